// SPDX-License-Identifier: GPL-3.0-only

//! Interactive node front end
//!
//! Builds the node from the command line, serves control requests, and
//! reads `start`, `stop`, `publish`, `status` and `quit` from stdin.

use crate::Cli;
use fusion_node::backends::source::SourceRequest;
use fusion_node::config::NodeConfig;
use fusion_node::constants::app_info;
use fusion_node::engine::DepthGridFactory;
use fusion_node::node::{
    ControlClient, ControlResponse, ControlServer, LifecycleState, NodeStatus, ReconstructionNode,
};
use fusion_node::transport::LocalBus;
use std::io::BufRead;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::{info, warn};

/// Run the node until `quit` or end of input
pub fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    info!(version = app_info::version(), "Starting fusion-node");

    let config = match cli.config.or_else(NodeConfig::default_path) {
        Some(path) => NodeConfig::load(&path)?,
        None => NodeConfig::default(),
    };

    let request = SourceRequest {
        calibration: cli.calibration,
        color_or_device: cli.color_or_device,
        depth_mask: cli.depth,
        imu_mask: cli.imu,
    };

    let node = Arc::new(
        ReconstructionNode::new(config, request, Arc::new(DepthGridFactory))
            .with_transport(Arc::new(LocalBus::new())),
    );

    let rt = Runtime::new()?;
    let client = {
        let _guard = rt.enter();
        let (server, client) = ControlServer::new(Arc::clone(&node));
        server.spawn();
        client
    };

    // Ctrl+C ends a running session; while idle it ends the process
    let ctrlc_node = Arc::clone(&node);
    ctrlc::set_handler(move || {
        if ctrlc_node.state() == LifecycleState::Idle {
            println!();
            std::process::exit(0);
        }
        println!();
        println!("Stopping...");
        if let Err(e) = ctrlc_node.start(false) {
            warn!(error = %e, "Stop failed");
        }
    })?;

    if cli.autostart {
        start_in_background(&rt, &client);
    }

    println!("Commands: start, stop, publish, status, quit");
    for line in std::io::stdin().lock().lines() {
        let line = line?;
        match line.trim() {
            "" => {}
            "start" => start_in_background(&rt, &client),
            "stop" => report(rt.block_on(client.start(false))),
            "publish" => report(rt.block_on(client.publish_mesh())),
            "status" => match rt.block_on(client.status()) {
                Ok(status) => print_status(&status),
                Err(e) => println!("Error: {}", e),
            },
            "quit" | "exit" => break,
            other => println!("Unknown command: {}", other),
        }
    }

    // Let a running session wind down before the runtime goes away
    if node.state() != LifecycleState::Idle {
        println!("Stopping...");
        node.start(false)?;
        rt.block_on(node.wait_finished());
    }
    Ok(())
}

/// `start(true)` blocks for the whole session, so run it off the input loop
fn start_in_background(rt: &Runtime, client: &ControlClient) {
    let client = client.clone();
    rt.spawn(async move {
        report(client.start(true).await);
    });
}

fn report(result: Result<ControlResponse, fusion_node::NodeError>) {
    match result {
        Ok(ControlResponse::RunFinished(summary)) => println!(
            "Session finished ({:?}): {} frames, {} idle polls, {} errors",
            summary.exit_reason, summary.frames_processed, summary.idle_polls, summary.errors
        ),
        Ok(ControlResponse::StopAcknowledged) => println!("Stop acknowledged"),
        Ok(ControlResponse::Published(report)) => {
            println!("Published {} triangles", report.triangles);
            if let Some(files) = &report.files {
                println!("  STL: {}", files.stl.display());
                println!("  OBJ: {}", files.obj.display());
                if let Some(las) = &files.las {
                    println!("  LAS: {}", las.display());
                }
            }
        }
        Ok(ControlResponse::Status(status)) => print_status(&status),
        Ok(ControlResponse::Failed(e)) | Err(e) => println!("Error: {}", e),
    }
}

fn print_status(status: &NodeStatus) {
    println!("State: {}", status.state);
    println!("Engine: {}", if status.engine_present { "yes" } else { "no" });
    if let Some(id) = status.session_id {
        println!("Session: {}", id);
    }
    if let Some(frames) = status.frames_processed {
        println!("Frames integrated: {}", frames);
    }
}
