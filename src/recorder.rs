// ===============================
// src/recorder.rs
// ===============================
//
// JSONL persistence for the bus: every published envelope, one line each,
// appended to RECORD_FILE. This is what makes the in-process log durable
// enough to audit or replay after the fact.
// - BufWriter agar hemat syscall
// - flush periodik tiap 1s dan/atau tiap 1000 envelope
// - reopen + retry sekali kalau tulis gagal
//
use std::path::Path;
use tokio::{
    fs::{self, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::mpsc,
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{error, info};

use crate::domain::RecordedEnvelope;

const FLUSH_EVERY_N_EVENTS: u32 = 1000;

async fn open_writer(path: &str) -> Option<BufWriter<tokio::fs::File>> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = fs::create_dir_all(parent).await {
                error!(?e, %path, "recorder: create_dir_all failed");
            }
        }
    }
    match OpenOptions::new().create(true).append(true).open(path).await {
        Ok(file) => Some(BufWriter::new(file)),
        Err(e) => {
            error!(?e, %path, "recorder: open failed");
            None
        }
    }
}

pub async fn run(mut rx: mpsc::Receiver<RecordedEnvelope>, path: String) {
    info!(%path, "recorder: started");
    let Some(mut writer) = open_writer(&path).await else {
        error!(%path, "recorder: disabled, could not open file");
        return;
    };

    let mut tick = interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut since_last_flush: u32 = 0;

    loop {
        tokio::select! {
            maybe_env = rx.recv() => {
                match maybe_env {
                    Some(env) => {
                        let mut line = match serde_json::to_vec(&env) {
                            Ok(v) => v,
                            Err(e) => {
                                error!(?e, "recorder: serialize error, skip envelope");
                                continue;
                            }
                        };
                        line.push(b'\n');

                        if let Err(e) = writer.write_all(&line).await {
                            error!(?e, "recorder: write failed, attempting reopen");
                            match open_writer(&path).await {
                                Some(w) => writer = w,
                                None => continue,
                            }
                            // coba sekali lagi setelah reopen
                            if let Err(e2) = writer.write_all(&line).await {
                                error!(?e2, "recorder: write failed again, drop envelope");
                                continue;
                            }
                        }

                        since_last_flush += 1;
                        if since_last_flush >= FLUSH_EVERY_N_EVENTS {
                            let _ = writer.flush().await;
                            since_last_flush = 0;
                        }
                    }
                    None => {
                        // channel closed: flush and leave
                        let _ = writer.flush().await;
                        info!("recorder: channel closed, stopped");
                        break;
                    }
                }
            }

            _ = tick.tick() => {
                let _ = writer.flush().await;
                since_last_flush = 0;
            }
        }
    }
}
