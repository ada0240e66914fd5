// Copyright (c) 2026 Amunchain
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]

//! HNCP diagnostic CLI (§6, supplemented from `hncptool.py`/`si.py`'s
//! `loop`/`poll` design): joins the named interfaces' multicast groups,
//! runs until the engine first reports network consistency or a timeout
//! elapses, then prints every valid node's TLVs.

use std::net::{Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, warn};

use dncp::config::NodeConfig;
use dncp::engine::Dncp;
use dncp::monitoring::metrics::{self, Metrics};
use dncp::profile::hncp::{Hncp, MULTICAST_GROUP, MULTICAST_PORT};
use dncp::transport::{resolve_ifindex, UdpTransport};

#[derive(Parser, Debug)]
#[command(name = "hncpd", about = "HNCP diagnostic node")]
struct Args {
    /// Total runtime in seconds before giving up.
    #[arg(short = 't', long = "timeout", default_value_t = 30.0)]
    timeout: f64,
    /// Write-enabled mode: publish non-Neighbor TLVs too. Default is
    /// read-only (§8 scenario 6).
    #[arg(short = 'w', long = "write")]
    write: bool,
    /// Verbose logging.
    #[arg(short = 'd', long = "debug")]
    debug: bool,
    /// Optional TOML config file; CLI flags above still override what it
    /// sets for read-only mode.
    #[arg(short = 'c', long = "config")]
    config: Option<std::path::PathBuf>,
    /// Expose Prometheus metrics at this address, e.g. "0.0.0.0:9102".
    #[arg(long = "metrics-listen")]
    metrics_listen: Option<SocketAddr>,
    /// Interface names to bind HNCP's multicast transport to.
    interfaces: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(if args.debug { tracing::Level::DEBUG } else { tracing::Level::INFO })
        .compact()
        .try_init();

    let file_cfg = match &args.config {
        Some(path) => Some(NodeConfig::load(path)?),
        None => None,
    };

    let interfaces = if !args.interfaces.is_empty() {
        args.interfaces.clone()
    } else {
        file_cfg.as_ref().map(|c| c.interfaces.clone()).unwrap_or_default()
    };
    if interfaces.is_empty() {
        anyhow::bail!("no interfaces given on the command line or in --config");
    }
    let read_only = !args.write && file_cfg.as_ref().map(|c| c.read_only).unwrap_or(true);
    let metrics_listen = args.metrics_listen.or_else(|| {
        file_cfg
            .as_ref()
            .and_then(|c| c.metrics_listen.as_ref())
            .and_then(|s| s.parse().ok())
    });

    let metrics = Arc::new(Metrics::new()?);
    if let Some(addr) = metrics_listen {
        let m = metrics.clone();
        tokio::spawn(async move {
            if let Err(e) = metrics::serve(m, addr).await {
                warn!(error = %e, "metrics server exited");
            }
        });
        info!(%addr, "serving /metrics");
    }

    let start = Instant::now();
    let clock = || start.elapsed().as_secs_f64();

    let mut rng = StdRng::from_entropy();
    let mut engine = Dncp::new(Hncp, None, read_only, clock(), &mut rng);
    engine.set_metrics(metrics.clone());

    let mut multicast_eps = Vec::with_capacity(interfaces.len());
    for name in &interfaces {
        let ep_id = engine.create_ep(name, clock(), &mut rng)?;
        engine.ep_ready(ep_id, true);
        let ifindex = resolve_ifindex(name)?;
        multicast_eps.push((ep_id, ifindex));
    }
    let unicast_ep_id = engine.create_ep("listen", clock(), &mut rng)?;
    engine.ep_ready(unicast_ep_id, true);

    let group: Ipv6Addr = MULTICAST_GROUP.parse().expect("MULTICAST_GROUP is a valid literal");
    let (transport, mut inbound_rx) = UdpTransport::bind(&multicast_eps, unicast_ep_id, group, MULTICAST_PORT)?;

    let deadline = clock() + args.timeout;
    loop {
        let now = clock();
        if now >= deadline {
            warn!(timeout = args.timeout, "timed out without reaching consistency");
            std::process::exit(2);
        }
        let next_wake = engine.run(now, &mut rng);
        for frame in engine.take_outbox() {
            if let Err(e) = transport.send(frame.ep_id, frame.dst.as_ref(), &frame.tlvs).await {
                warn!(error = %e, "send failed");
            } else {
                metrics.frames_sent_total.inc();
            }
        }
        metrics.valid_nodes.set(engine.valid_node_ids().len() as i64);
        if engine.is_consistent() {
            break;
        }
        let sleep_for = (next_wake - clock()).clamp(0.01, (deadline - clock()).max(0.01));
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs_f64(sleep_for)) => {}
            maybe = inbound_rx.recv() => {
                if let Some(frame) = maybe {
                    metrics.frames_received_total.inc();
                    engine.ext_received(frame.ep_id, frame.src, frame.dst, frame.tlvs, clock(), &mut rng);
                }
            }
        }
    }

    for node in engine.valid_sorted_nodes() {
        println!("node {}", hex::encode(&node.node_id));
        for t in &node.tlvs {
            println!("  {t:?}");
        }
    }
    Ok(())
}
