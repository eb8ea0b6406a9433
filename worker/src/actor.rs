//! One worker task per active download (C13). `WorkerActor` is the shared,
//! cloneable front door: `dispatch` handles a command synchronously for
//! everything except `StartDownload`, which spawns a task that owns the
//! `DownloadHandle` until the run reaches a terminal state.
//!
//! Outbound messages fan out over a `broadcast` channel, the same pattern
//! `AppState`'s `ws_tx`/`warnings_tx` use for pushing updates to however
//! many listeners are subscribed.

use crate::protocol::{
    DownloadCancelledMsg, DownloadCompleteMsg, DownloadErrorMsg, DownloadStartedMsg, ProgressUpdateMsg, TileDownloadedMsg, WorkerCommand,
    WorkerResponse,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tile_download_engine::{download_tiles, DownloadConfig, DownloadControl};
use tile_download_shared::DownloadState;
use tokio::sync::broadcast;
use tokio::time::{interval, Duration};
use tracing::{instrument, warn};

/// `PROGRESS_UPDATE` is pushed at most once per second (spec.md §6).
const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct WorkerActor {
    controls: Arc<Mutex<HashMap<String, DownloadControl>>>,
    out_tx: broadcast::Sender<WorkerResponse>,
}

impl WorkerActor {
    pub fn new() -> (Self, broadcast::Receiver<WorkerResponse>) {
        let (out_tx, out_rx) = broadcast::channel(256);
        (
            Self {
                controls: Arc::new(Mutex::new(HashMap::new())),
                out_tx,
            },
            out_rx,
        )
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkerResponse> {
        self.out_tx.subscribe()
    }

    #[instrument(skip(self, command))]
    pub fn dispatch(&self, command: WorkerCommand) {
        match command {
            WorkerCommand::StartDownload { id, config } => self.start(id, config.into_config()),
            WorkerCommand::PauseDownload { id } => self.with_control(&id, DownloadControl::pause),
            WorkerCommand::ResumeDownload { id } => self.with_control(&id, DownloadControl::resume),
            WorkerCommand::CancelDownload { id } => self.with_control(&id, DownloadControl::cancel),
            WorkerCommand::GetProgress { id } => self.push_progress(&id),
        }
    }

    fn with_control(&self, id: &str, f: impl FnOnce(&DownloadControl)) {
        let controls = self.controls.lock().unwrap();
        match controls.get(id) {
            Some(control) => f(control),
            None => warn!(id, "command for unknown or already-finished download"),
        }
    }

    fn push_progress(&self, id: &str) {
        let controls = self.controls.lock().unwrap();
        if let Some(control) = controls.get(id) {
            let _ = self.out_tx.send(WorkerResponse::ProgressUpdate(ProgressUpdateMsg {
                id: id.to_string(),
                progress: control.progress(),
            }));
        }
    }

    fn start(&self, id: String, config: DownloadConfig) {
        let controls = self.controls.clone();
        let out_tx = self.out_tx.clone();
        let task_id = id;

        tokio::spawn(async move {
            let mut handle = match download_tiles(config).await {
                Ok(handle) => handle,
                Err(err) => {
                    let _ = out_tx.send(WorkerResponse::DownloadError(DownloadErrorMsg {
                        id: task_id,
                        message: err.to_string(),
                    }));
                    return;
                }
            };

            controls.lock().unwrap().insert(task_id.clone(), handle.control());
            let _ = out_tx.send(WorkerResponse::DownloadStarted(DownloadStartedMsg {
                id: task_id.clone(),
                total_tiles: handle.total_tiles(),
                estimated_size: handle.estimated_size(),
            }));

            let mut ticker = interval(PROGRESS_INTERVAL);
            ticker.tick().await; // first tick fires immediately; the DownloadStarted push just above covers it

            loop {
                tokio::select! {
                    tile = handle.next_tile() => {
                        match tile {
                            Some(payload) => {
                                let _ = out_tx.send(WorkerResponse::TileDownloaded(TileDownloadedMsg {
                                    id: task_id.clone(),
                                    service_name: payload.service_name,
                                    z: payload.z,
                                    x: payload.x,
                                    y: payload.y,
                                    byte_length: payload.byte_length(),
                                }));
                            }
                            None => break,
                        }
                    }
                    _ = ticker.tick() => {
                        let _ = out_tx.send(WorkerResponse::ProgressUpdate(ProgressUpdateMsg {
                            id: task_id.clone(),
                            progress: handle.progress(),
                        }));
                    }
                }
            }

            let final_state = handle.progress().state;
            let response = match handle.stats().await {
                Err(exceeded) => WorkerResponse::DownloadError(DownloadErrorMsg {
                    id: task_id.clone(),
                    message: exceeded.to_string(),
                }),
                Ok(stats) if final_state == DownloadState::Cancelled => {
                    WorkerResponse::DownloadCancelled(DownloadCancelledMsg { id: task_id.clone(), stats })
                }
                Ok(stats) => WorkerResponse::DownloadComplete(DownloadCompleteMsg { id: task_id.clone(), stats }),
            };
            let _ = out_tx.send(response);
            controls.lock().unwrap().remove(&task_id);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::DownloadConfigMsg;
    use std::time::Duration as StdDuration;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn start_download_reaches_download_complete() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1, 2, 3]).insert_header("content-type", "image/png"))
            .mount(&server)
            .await;

        let (actor, mut out_rx) = WorkerActor::new();
        let config = DownloadConfigMsg {
            service_name: "osm".to_string(),
            url_template: format!("{}/{{z}}/{{x}}/{{y}}.png", server.uri()),
            bbox: [13.3, 52.5, 13.31, 52.51],
            min_zoom: 10,
            max_zoom: 10,
            crs: None,
            subdomains: Some(Vec::new()),
            tile_scheme: None,
            concurrency: None,
            rate_limit: None,
            retries: None,
            retry_base_delay_ms: None,
            capabilities_url: None,
        };
        actor.dispatch(WorkerCommand::StartDownload {
            id: "job-1".to_string(),
            config,
        });

        let mut saw_complete = false;
        for _ in 0..50 {
            match tokio::time::timeout(StdDuration::from_secs(2), out_rx.recv()).await {
                Ok(Ok(WorkerResponse::DownloadComplete(msg))) => {
                    assert_eq!(msg.id, "job-1");
                    saw_complete = true;
                    break;
                }
                Ok(Ok(_)) => continue,
                _ => break,
            }
        }
        assert!(saw_complete, "expected a DownloadComplete message");
    }

    #[test]
    fn unknown_id_command_does_not_panic() {
        let (actor, _rx) = WorkerActor::new();
        actor.dispatch(WorkerCommand::PauseDownload { id: "nope".to_string() });
        actor.dispatch(WorkerCommand::GetProgress { id: "nope".to_string() });
    }
}
