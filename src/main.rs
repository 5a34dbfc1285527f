use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Result;

use agentfx::agent::Agent;
use agentfx::clock::SystemClock;
use agentfx::config::Config;
use agentfx::feed::build_feed;
use agentfx::logging::{json_log, obj, v_str};

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    json_log(
        "main",
        obj(&[
            ("event", v_str("boot")),
            ("config_hash", v_str(&cfg.config_hash())),
            ("feed", v_str(&cfg.feed_kind)),
            ("tokens", v_str(&cfg.tracked_tokens.join(","))),
        ]),
    );

    let feed = build_feed(&cfg)?;
    let mut agent = Agent::new(cfg, Arc::new(SystemClock), feed)?;

    // SIGINT flips the running flag; the loop finishes its tick, flushes
    // and exits on its own.
    let running = agent.stop_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            json_log("main", obj(&[("event", v_str("stop_requested"))]));
            running.store(false, Ordering::SeqCst);
        }
    });

    agent.run().await
}
