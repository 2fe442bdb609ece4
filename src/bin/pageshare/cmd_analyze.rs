use anyhow::Result;
use serde::Serialize;

use pageshare::{
    add_snapshot, diff, merge, probe, test_snapshot, CollisionStats, ContentIndex, ShareConfig,
    Snapshot, STATS_HEADER,
};

use crate::cli::AnalyzeOp;
use crate::util;

#[derive(Serialize)]
struct Row {
    input: String,
    pid: i32,
    stats: CollisionStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    secondary: Option<CollisionStats>,
}

fn emit(rows: &[Row], json: bool) {
    if json {
        util::print_json(&rows);
        return;
    }
    println!("{}", STATS_HEADER);
    for r in rows {
        match &r.secondary {
            Some(sec) => println!("{}{}", r.stats.record_line(), sec.record_line()),
            None => println!("{}", r.stats.record_line()),
        }
    }
}

/// Index built from every snapshot an input names.
fn index_of(snaps: &[Snapshot]) -> ContentIndex {
    let mut ix = ContentIndex::new();
    let mut scratch = CollisionStats::new();
    for s in snaps {
        add_snapshot(&mut ix, s, &mut scratch);
    }
    ix
}

pub fn exec(op: AnalyzeOp, mark: bool, json: bool) -> Result<()> {
    let cfg = util::config(None, None);
    match op {
        AnalyzeOp::Add { inputs } => exec_add(&cfg, inputs, mark, json),
        AnalyzeOp::Test { reference, inputs } => exec_test(&cfg, reference, inputs, mark, json),
        AnalyzeOp::Merge { reference, inputs } => {
            exec_fold(&cfg, reference, inputs, mark, json, true)
        }
        AnalyzeOp::Probe { reference, inputs } => {
            exec_fold(&cfg, reference, inputs, mark, json, false)
        }
        AnalyzeOp::Diff { a, b } => exec_diff(&cfg, a, b, mark, json),
    }
}

/// Cumulative stats after each snapshot is added.
fn exec_add(cfg: &ShareConfig, inputs: Vec<String>, mark: bool, json: bool) -> Result<()> {
    let mut ix = ContentIndex::new();
    let mut stats = CollisionStats::new();
    let mut rows = Vec::new();
    for input in inputs {
        for s in util::acquire_input(&input, cfg, mark)? {
            add_snapshot(&mut ix, &s, &mut stats);
            rows.push(Row {
                input: input.clone(),
                pid: s.header.pid,
                stats: stats.clone(),
                secondary: None,
            });
        }
    }
    emit(&rows, json);
    Ok(())
}

/// Each input against the reference; misses accumulate in one secondary index.
fn exec_test(
    cfg: &ShareConfig,
    reference: String,
    inputs: Vec<String>,
    mark: bool,
    json: bool,
) -> Result<()> {
    let primary = index_of(&util::acquire_input(&reference, cfg, mark)?);
    let mut secondary = ContentIndex::new();
    let mut rows = Vec::new();
    for input in inputs {
        for s in util::acquire_input(&input, cfg, mark)? {
            let (mut ps, mut ss) = (CollisionStats::new(), CollisionStats::new());
            test_snapshot(&s, &primary, &mut secondary, &mut ps, &mut ss);
            rows.push(Row {
                input: input.clone(),
                pid: s.header.pid,
                stats: ps,
                secondary: Some(ss),
            });
        }
    }
    emit(&rows, json);
    Ok(())
}

/// Merge (or probe) each input's own index into the reference index.
fn exec_fold(
    cfg: &ShareConfig,
    reference: String,
    inputs: Vec<String>,
    mark: bool,
    json: bool,
    mutate: bool,
) -> Result<()> {
    let ref_snap = util::acquire_one(&reference, cfg, mark)?;
    let mut dst = index_of(std::slice::from_ref(&ref_snap));
    let mut rows = Vec::new();
    for input in inputs {
        for s in util::acquire_input(&input, cfg, mark)? {
            let src = index_of(std::slice::from_ref(&s));
            let mut stats = CollisionStats::new();
            if mutate {
                merge(&mut dst, &src, &ref_snap, &mut stats);
            } else {
                probe(&dst, &src, &ref_snap, &mut stats);
            }
            rows.push(Row {
                input: input.clone(),
                pid: s.header.pid,
                stats,
                secondary: None,
            });
        }
    }
    emit(&rows, json);
    Ok(())
}

fn exec_diff(cfg: &ShareConfig, a: String, b: String, mark: bool, json: bool) -> Result<()> {
    let ia = index_of(&util::acquire_input(&a, cfg, mark)?);
    let ib = index_of(&util::acquire_input(&b, cfg, mark)?);
    let report = diff(&ia, &ib);
    if json {
        util::print_json(&report);
    } else {
        println!("{} {} {}", report.only_in_b, report.only_in_a, report.delta);
    }
    Ok(())
}
