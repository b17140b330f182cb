//! `keysync watch [--poll]`: consumer side of the signal protocol.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use keysync_core::{config, PackageIdentifier};
use keysync_ipc::{
    parse_signal_file_name, FolderChange, PollingWatcher, SignalChannel, SignalEvent,
    SignalSubscriber,
};

/// Arguments for `keysync watch`.
#[derive(Args, Debug)]
pub struct WatchArgs {
    /// List the directory on a timer instead of using filesystem events.
    #[arg(long)]
    pub poll: bool,

    /// Poll interval in milliseconds (with `--poll`).
    #[arg(long, default_value_t = 1000, requires = "poll")]
    pub interval_ms: u64,
}

impl WatchArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let cfg = config::load_or_default_at(&home).context("failed to read config")?;
        let channel = super::signal_channel(&home, &cfg);

        let runtime = super::runtime()?;
        if self.poll {
            runtime.block_on(watch_polling(&channel, Duration::from_millis(self.interval_ms)))
        } else {
            runtime.block_on(watch_events(&channel))
        }
    }
}

async fn watch_events(channel: &SignalChannel) -> Result<()> {
    let (subscriber, mut events) = SignalSubscriber::channel();
    let _subscription = channel
        .subscribe(subscriber)
        .with_context(|| format!("cannot watch {}", channel.dir().display()))?;
    println!("Watching {} (Ctrl-C to stop)", channel.dir().display());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Some(SignalEvent::BeganDownloading(id)) => print_began(&id),
                Some(SignalEvent::FinishedInstalling(id)) => print_finished(&id),
                None => break,
            },
        }
    }
    Ok(())
}

async fn watch_polling(channel: &SignalChannel, interval: Duration) -> Result<()> {
    let watcher = PollingWatcher::with_interval(channel.dir(), interval);
    println!(
        "Polling {} every {}ms (Ctrl-C to stop)",
        channel.dir().display(),
        interval.as_millis()
    );
    for id in channel.in_flight().unwrap_or_default() {
        print_began(&id);
    }

    let (handle, mut changes) = watcher.spawn();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            change = changes.recv() => match change {
                Some(FolderChange::Added(path)) => {
                    if let Some(id) = signal_id(&path) {
                        print_began(&id);
                    }
                }
                Some(FolderChange::Removed(path)) => {
                    if let Some(id) = signal_id(&path) {
                        print_finished(&id);
                    }
                }
                None => break,
            },
        }
    }
    handle.stop().await;
    Ok(())
}

fn signal_id(path: &Path) -> Option<PackageIdentifier> {
    path.file_name()
        .and_then(|name| name.to_str())
        .and_then(parse_signal_file_name)
}

fn print_began(id: &PackageIdentifier) {
    println!("{} downloading {id}", "▶".cyan());
}

fn print_finished(id: &PackageIdentifier) {
    println!("{} finished {id}", "✓".green());
}
