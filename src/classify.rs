//! Collision classification and the statistics record.
//!
//! Every classified collision bumps exactly one of `shared`/`sharing_op`, at
//! most one zero counter, and exactly one (class, writable) pair of counters.

use std::ops::AddAssign;

use log::debug;
use serde::Serialize;

use crate::digest::Digest;
use crate::snapshot::RegionKind;

/// Whether colliding content already sits on one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SharingKind {
    /// Same physical frame.
    Shared,
    /// Same content, different frames: a dedup opportunity.
    SharingOp,
}

/// Statistics bucket of a classified page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StatClass {
    Stack,
    Heap,
    Anonymous,
    Named,
}

impl StatClass {
    /// Path regions split on the page inode; unresolved and other regions count
    /// as named.
    pub fn resolve(kind: Option<RegionKind>, inode: u64) -> Self {
        match kind {
            Some(RegionKind::Stack) => StatClass::Stack,
            Some(RegionKind::Heap) => StatClass::Heap,
            Some(RegionKind::Path) if inode != 0 => StatClass::Named,
            Some(RegionKind::Path) => StatClass::Anonymous,
            Some(RegionKind::Other) => StatClass::Named,
            None => {
                debug!("classify: page region does not resolve, counting as named");
                StatClass::Named
            }
        }
    }
}

/// Additive sharing counters. Field order is the record column order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollisionStats {
    pub unshareable: u64,
    pub shareable: u64,

    pub shared: u64,
    pub shared_zero: u64,
    pub shared_stack: u64,
    pub shared_stack_rw: u64,
    pub shared_heap: u64,
    pub shared_heap_rw: u64,
    pub shared_anon: u64,
    pub shared_anon_rw: u64,
    pub shared_named: u64,
    pub shared_named_rw: u64,

    pub sharing_op: u64,
    pub sharing_zero: u64,
    pub sharing_stack: u64,
    pub sharing_stack_rw: u64,
    pub sharing_heap: u64,
    pub sharing_heap_rw: u64,
    pub sharing_anon: u64,
    pub sharing_anon_rw: u64,
    pub sharing_named: u64,
    pub sharing_named_rw: u64,

    /// Reserved diagnostic columns; never incremented.
    pub diff_name: u64,
    pub anon_named: u64,
    pub named_anon: u64,

    /// Resident pages whose reference count exceeds one.
    pub shared_counter: u64,
    /// Same, restricted to pages with inode > 2.
    pub named_shared_counter: u64,
}

pub const STATS_HEADER: &str = "Unshareable;Shareable;Shared;SharedZeroPages;\
stack;stack rw;heap;heap rw;anonymous;anon rw;named;named rw;\
Sharing Op;SharingOpZeroPages;\
stack;stack rw;heap;heap rw;anonymous;anon rw;named;named rw;;;;\
shared count;named shared count;";

impl CollisionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters in record column order.
    pub fn columns(&self) -> [u64; 27] {
        [
            self.unshareable,
            self.shareable,
            self.shared,
            self.shared_zero,
            self.shared_stack,
            self.shared_stack_rw,
            self.shared_heap,
            self.shared_heap_rw,
            self.shared_anon,
            self.shared_anon_rw,
            self.shared_named,
            self.shared_named_rw,
            self.sharing_op,
            self.sharing_zero,
            self.sharing_stack,
            self.sharing_stack_rw,
            self.sharing_heap,
            self.sharing_heap_rw,
            self.sharing_anon,
            self.sharing_anon_rw,
            self.sharing_named,
            self.sharing_named_rw,
            self.diff_name,
            self.anon_named,
            self.named_anon,
            self.shared_counter,
            self.named_shared_counter,
        ]
    }

    /// `;`-terminated record matching [`STATS_HEADER`].
    pub fn record_line(&self) -> String {
        let mut s = String::with_capacity(27 * 4);
        for v in self.columns() {
            s.push_str(&v.to_string());
            s.push(';');
        }
        s
    }

    /// Count a resident page's producer-reported multiplicity.
    pub fn count_reference(&mut self, reference_count: i32, inode: u64) {
        if reference_count > 1 {
            self.shared_counter += 1;
            if inode > 2 {
                self.named_shared_counter += 1;
            }
        }
    }

    fn slot(&mut self, kind: SharingKind, class: StatClass) -> (&mut u64, &mut u64) {
        match (kind, class) {
            (SharingKind::Shared, StatClass::Stack) => (&mut self.shared_stack, &mut self.shared_stack_rw),
            (SharingKind::Shared, StatClass::Heap) => (&mut self.shared_heap, &mut self.shared_heap_rw),
            (SharingKind::Shared, StatClass::Anonymous) => (&mut self.shared_anon, &mut self.shared_anon_rw),
            (SharingKind::Shared, StatClass::Named) => (&mut self.shared_named, &mut self.shared_named_rw),
            (SharingKind::SharingOp, StatClass::Stack) => (&mut self.sharing_stack, &mut self.sharing_stack_rw),
            (SharingKind::SharingOp, StatClass::Heap) => (&mut self.sharing_heap, &mut self.sharing_heap_rw),
            (SharingKind::SharingOp, StatClass::Anonymous) => (&mut self.sharing_anon, &mut self.sharing_anon_rw),
            (SharingKind::SharingOp, StatClass::Named) => (&mut self.sharing_named, &mut self.sharing_named_rw),
        }
    }
}

impl AddAssign<&CollisionStats> for CollisionStats {
    fn add_assign(&mut self, o: &CollisionStats) {
        self.unshareable += o.unshareable;
        self.shareable += o.shareable;
        self.shared += o.shared;
        self.shared_zero += o.shared_zero;
        self.shared_stack += o.shared_stack;
        self.shared_stack_rw += o.shared_stack_rw;
        self.shared_heap += o.shared_heap;
        self.shared_heap_rw += o.shared_heap_rw;
        self.shared_anon += o.shared_anon;
        self.shared_anon_rw += o.shared_anon_rw;
        self.shared_named += o.shared_named;
        self.shared_named_rw += o.shared_named_rw;
        self.sharing_op += o.sharing_op;
        self.sharing_zero += o.sharing_zero;
        self.sharing_stack += o.sharing_stack;
        self.sharing_stack_rw += o.sharing_stack_rw;
        self.sharing_heap += o.sharing_heap;
        self.sharing_heap_rw += o.sharing_heap_rw;
        self.sharing_anon += o.sharing_anon;
        self.sharing_anon_rw += o.sharing_anon_rw;
        self.sharing_named += o.sharing_named;
        self.sharing_named_rw += o.sharing_named_rw;
        self.diff_name += o.diff_name;
        self.anon_named += o.anon_named;
        self.named_anon += o.named_anon;
        self.shared_counter += o.shared_counter;
        self.named_shared_counter += o.named_shared_counter;
    }
}

/// Facts about the page being classified.
#[derive(Debug, Clone, Copy)]
pub struct ClassifiedPage<'a> {
    pub digest: &'a Digest,
    pub inode: u64,
    pub writable: bool,
    /// Kind of the page's region, `None` when the origin does not resolve.
    pub region: Option<RegionKind>,
}

/// Record one collision in `stats`.
pub fn classify(kind: SharingKind, page: ClassifiedPage<'_>, zero: &Digest, stats: &mut CollisionStats) {
    let is_zero = page.digest == zero;
    match kind {
        SharingKind::Shared => {
            stats.shared += 1;
            if is_zero {
                stats.shared_zero += 1;
            }
        }
        SharingKind::SharingOp => {
            stats.sharing_op += 1;
            if is_zero {
                stats.sharing_zero += 1;
            }
        }
    }
    let class = StatClass::resolve(page.region, page.inode);
    let (all, rw) = stats.slot(kind, class);
    *all += 1;
    if page.writable {
        *rw += 1;
    }
}
