//! Live task progress over websocket
//!
//! One subscription per running task. Frames are JSON `TaskProgress`
//! snapshots; a frame that fails to parse is skipped, a transport failure is
//! reported once and the subscription ends. There is no automatic
//! reconnection: the task either finishes or the caller resubscribes.

use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::error::{AutomationError, Result};
use crate::models::TaskProgress;

/// Handle on a live progress stream. Dropping it tears the stream down;
/// `unsubscribe` does the same explicitly.
#[derive(Debug)]
pub struct TaskSubscription {
    handle: Option<JoinHandle<()>>,
}

impl TaskSubscription {
    pub fn unsubscribe(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for TaskSubscription {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Open the progress stream for `task_id` against the service at
/// `base_url`. `on_update` fires for every well-formed frame; `on_error`
/// fires at most once, if the stream fails mid-flight.
pub async fn subscribe_task<U, E>(
    base_url: &str,
    task_id: &str,
    mut on_update: U,
    on_error: E,
) -> Result<TaskSubscription>
where
    U: FnMut(TaskProgress) + Send + 'static,
    E: FnOnce(AutomationError) + Send + 'static,
{
    let url = ws_url(base_url, task_id);
    let (stream, _) = connect_async(url.as_str()).await.map_err(|e| {
        warn!(%url, "progress stream connect failed: {e}");
        AutomationError::ConnectionFailed
    })?;
    debug!(%url, "progress stream open");

    let handle = tokio::spawn(async move {
        let (_, mut read) = stream.split();
        let mut on_error = Some(on_error);
        while let Some(frame) = read.next().await {
            match frame {
                Ok(Message::Text(text)) => match serde_json::from_str::<TaskProgress>(&text) {
                    Ok(progress) => on_update(progress),
                    Err(e) => warn!("skipping malformed progress frame: {e}"),
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!("progress stream failed: {e}");
                    if let Some(on_error) = on_error.take() {
                        on_error(AutomationError::ConnectionFailed);
                    }
                    break;
                }
            }
        }
        debug!("progress stream ended");
    });

    Ok(TaskSubscription {
        handle: Some(handle),
    })
}

fn ws_url(base_url: &str, task_id: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{base}/ws/progress/{task_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::SinkExt;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    /// One-shot websocket server that sends each frame then closes.
    async fn serve_frames(frames: Vec<String>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
            for frame in frames {
                ws.send(Message::Text(frame.into())).await.unwrap();
            }
            ws.close(None).await.ok();
        });
        format!("http://{addr}")
    }

    fn progress_frame(status: &str, progress: i32, message: &str) -> String {
        serde_json::json!({
            "task_id": "t1",
            "status": status,
            "progress": progress,
            "message": message,
            "timestamp": "2025-01-20T10:05:00"
        })
        .to_string()
    }

    #[tokio::test]
    async fn updates_arrive_in_order_and_malformed_frames_are_skipped() {
        let base_url = serve_frames(vec![
            progress_frame("running", 30, "Navigating to portal"),
            "not json at all".to_string(),
            progress_frame("completed", 100, "Done"),
        ])
        .await;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in = Arc::clone(&seen);
        let _subscription = subscribe_task(
            &base_url,
            "t1",
            move |p| seen_in.lock().unwrap().push((p.progress, p.status)),
            |e| panic!("unexpected stream error: {e}"),
        )
        .await
        .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], (30, "running".to_string()));
        assert_eq!(seen[1], (100, "completed".to_string()));
    }

    #[tokio::test]
    async fn connect_failure_is_reported_to_the_caller() {
        // Bind then drop to get an address with no listener.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let err = subscribe_task(&base_url, "t1", |_| {}, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, AutomationError::ConnectionFailed));
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
            ws.send(Message::Text(
                progress_frame("running", 10, "Starting").into(),
            ))
            .await
            .unwrap();
            // Hold the connection open; later frames must go nowhere.
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            ws.send(Message::Text(
                progress_frame("running", 50, "Halfway").into(),
            ))
            .await
            .ok();
        });

        let delivered = Arc::new(AtomicBool::new(false));
        let late = Arc::new(AtomicBool::new(false));
        let delivered_in = Arc::clone(&delivered);
        let late_in = Arc::clone(&late);
        let subscription = subscribe_task(
            &format!("http://{addr}"),
            "t1",
            move |p| {
                if p.progress == 10 {
                    delivered_in.store(true, Ordering::SeqCst);
                } else {
                    late_in.store(true, Ordering::SeqCst);
                }
            },
            |_| {},
        )
        .await
        .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(delivered.load(Ordering::SeqCst));
        subscription.unsubscribe();

        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        assert!(!late.load(Ordering::SeqCst));
    }
}
