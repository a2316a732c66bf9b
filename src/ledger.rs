use std::cell::Cell;

use crate::stats::Stats;

#[cfg(feature = "global")]
use lazy_static::lazy_static;
#[cfg(feature = "global")]
use parking_lot::Mutex;

/// Per-thread tallies of control-block traffic. The counting protocol in
/// `blocks` reports every allocation, payload teardown, and deallocation
/// here; nothing else writes to it.
#[derive(Default)]
struct LocalLedger
{
    live_blocks: Cell<usize>,
    live_payloads: Cell<usize>,
    separate_blocks: Cell<u64>,
    inline_blocks: Cell<u64>,
}

thread_local! {
    static LEDGER: LocalLedger = LocalLedger::default();
}

impl LocalLedger
{
    fn block_allocated(&self)
    {
        self.live_blocks.set(self.live_blocks.get() + 1);
        self.live_payloads.set(self.live_payloads.get() + 1);
    }

    fn snapshot(&self) -> Stats
    {
        Stats {
            live_blocks: self.live_blocks.get(),
            live_payloads: self.live_payloads.get(),
            separate_blocks: self.separate_blocks.get(),
            inline_blocks: self.inline_blocks.get(),
        }
    }
}

pub(crate) fn separate_block_allocated()
{
    LEDGER.with(|ledger| {
        ledger.block_allocated();
        ledger.separate_blocks.set(ledger.separate_blocks.get() + 1);
    })
}

pub(crate) fn inline_block_allocated()
{
    LEDGER.with(|ledger| {
        ledger.block_allocated();
        ledger.inline_blocks.set(ledger.inline_blocks.get() + 1);
    })
}

pub(crate) fn payload_destroyed()
{
    LEDGER.with(|ledger| ledger.live_payloads.set(ledger.live_payloads.get() - 1))
}

pub(crate) fn block_freed()
{
    LEDGER.with(|ledger| ledger.live_blocks.set(ledger.live_blocks.get() - 1))
}

/// A snapshot of the calling thread's bookkeeping. With balanced handle
/// traffic, `live_blocks` and `live_payloads` return to their previous
/// values; anything left over is a leaked group.
pub fn thread_stats() -> Stats { LEDGER.with(|ledger| ledger.snapshot()) }

#[cfg(feature = "global")]
lazy_static! {
    static ref GLOBAL_LEDGER: Mutex<Stats> = Mutex::new(Stats::default());
}

/// Threads fold their ledger into the global one when they exit, so the
/// global view lags threads that are still running.
#[cfg(feature = "global")]
impl Drop for LocalLedger
{
    fn drop(&mut self)
    {
        let mut global = GLOBAL_LEDGER.lock();
        global.live_blocks += self.live_blocks.get();
        global.live_payloads += self.live_payloads.get();
        global.separate_blocks += self.separate_blocks.get();
        global.inline_blocks += self.inline_blocks.get();
    }
}

/// A snapshot of the process-wide bookkeeping folded in by exited threads.
/// A nonzero `live_blocks` here means some thread leaked a group.
#[cfg(feature = "global")]
pub fn global_stats() -> Stats { GLOBAL_LEDGER.lock().clone() }
