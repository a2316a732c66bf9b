/// Control-block bookkeeping statistics, for diagnosing leaks and for
/// observing the exactly-once destruction protocol from tests.
#[derive(Clone, Default, Debug)]
pub struct Stats
{
    /// Control blocks currently allocated in this view.
    pub live_blocks: usize,

    /// Payloads currently alive, i.e. blocks whose strong count has not yet
    /// reached zero.
    pub live_payloads: usize,

    /// Cumulative number of two-allocation (separately boxed) blocks ever
    /// created in this view.
    pub separate_blocks: u64,

    /// Cumulative number of single-allocation (payload embedded) blocks
    /// ever created in this view.
    pub inline_blocks: u64,
}

impl Stats
{
    /// Cumulative number of control blocks ever created in this view.
    pub fn blocks_created(&self) -> u64 { self.separate_blocks + self.inline_blocks }

    /// Blocks whose payload is already destroyed but which are kept
    /// allocated by weak observers alone.
    pub fn weak_only_blocks(&self) -> usize { self.live_blocks - self.live_payloads }
}
