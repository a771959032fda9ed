use clap::Args;

// ═══════════════════════════════════════════════════════════════
//  CLI args
// ═══════════════════════════════════════════════════════════════

#[derive(Args, Clone, Debug)]
pub struct SubArgs {
    /// WebSocket endpoint of the server
    #[arg(long, default_value = "ws://127.0.0.1:9300/ws", env = "TICK_URL")]
    pub url: String,

    /// Subscriber id sent with identify and stats
    #[arg(long, default_value = "tick-sub", env = "TICK_SUBSCRIBER_ID")]
    pub id: String,

    /// Decode one frame in N for latency (0 = never)
    #[arg(long, default_value_t = 1000)]
    pub sample_every: u64,

    /// Stop after this many seconds (runs until Ctrl+C when omitted)
    #[arg(long)]
    pub duration: Option<u64>,
}
