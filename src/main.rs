use anyhow::Result;
use dccbot::config::{self, AppConfig};
use dccbot::dcc::manager::{DccManager, APPLICATION_PREFIX, MESSAGE_COMMAND};
use dccbot::logging::{self, FileEventLog};
use dccbot::nickserv::{events, NickServ};
use dccbot::pool::WorkerPool;
use dccbot::protocol::{Dispatcher, Event, HandlerSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = config::load_config(config_path.as_deref())?;
    logging::init_tracing(&cfg.logging.filter);

    info!(nick = %cfg.nickname, "Starting dccbot");
    run(cfg).await
}

async fn run(cfg: AppConfig) -> Result<()> {
    let dispatcher = Dispatcher::new(Arc::new(FileEventLog::new(&cfg.logging)));
    let shutdown = CancellationToken::new();

    let (pool, mut failures) = WorkerPool::new(cfg.dcc.workers);
    tokio::spawn(async move {
        while let Some(failure) = failures.recv().await {
            warn!(task = %failure.task, error = %failure.error, "handler failed");
        }
    });

    // Echo handler: runs on the pool, replies go back through the manager.
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<(String, String)>();
    let application = HandlerSet::new(APPLICATION_PREFIX)
        .on(MESSAGE_COMMAND, move |ev: &Event| {
            reply_tx.send((ev.sender().to_string(), ev.message().to_string()))?;
            Ok(())
        })
        .on("CHAT", |ev: &Event| {
            info!(sender = ev.sender(), offer = ev.message(), "DCC CHAT requested");
            Ok(())
        });

    let manager = DccManager::new(
        cfg.nickname.as_str(),
        &cfg.dcc,
        dispatcher.clone(),
        application,
        pool,
        shutdown.clone(),
    );

    let replier = Arc::clone(&manager);
    tokio::spawn(async move {
        while let Some((nick, line)) = reply_rx.recv().await {
            if let Err(e) = replier.say(&nick, &line) {
                warn!(%nick, error = %e, "echo not delivered");
            }
        }
    });

    let nickserv = NickServ::new(
        dispatcher,
        HandlerSet::new(events::APPLICATION_PREFIX).on("ACC", |ev: &Event| {
            info!(status = ev.message(), "NickServ status");
            Ok(())
        }),
        Duration::from_secs(cfg.nickserv.status_timeout_secs),
    );

    if cfg.dcc.enabled {
        match manager.start(&cfg.dcc).await {
            Ok(endpoint) => {
                info!(local = %endpoint.local, public = %endpoint.public_ip, "DCC ready");
                for peer in &cfg.dcc.peers {
                    match manager.offer(&peer.nick, &peer.ip) {
                        Ok(offer) => info!(nick = %peer.nick, %offer, "peer registered"),
                        Err(e) => error!(nick = %peer.nick, error = %e, "peer not registered"),
                    }
                }
            }
            Err(e) if e.is_startup() => error!(error = %e, "DCC disabled"),
            Err(e) => return Err(e.into()),
        }
    } else {
        info!("DCC disabled by config");
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    shutdown.cancel();
    nickserv.shutdown();
    Ok(())
}
