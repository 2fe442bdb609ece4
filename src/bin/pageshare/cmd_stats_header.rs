use anyhow::Result;

use pageshare::STATS_HEADER;

pub fn exec() -> Result<()> {
    println!("{}", STATS_HEADER);
    Ok(())
}
