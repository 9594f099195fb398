//! Stream multiplexer (C8): bridges a conversation's internal event
//! channel to an SSE byte stream, injecting the no-content warning and the
//! terminal frame + sentinel the HTTP boundary relies on for I5.

use futures::Stream;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorCode, StageError};
use super::event::{StreamEvent, SENTINEL_FRAME};

/// How the driving task ended, surfaced for logging at the call site.
#[derive(Debug)]
pub enum MultiplexOutcome {
    Completed,
    DriverError,
    DriverPanicked,
}

/// Aborts the driver task if dropped before `disarm` is called — the
/// path that fires when the SSE body is dropped mid-stream (a client
/// disconnect) without the generator ever reaching its own cancellation
/// check.
struct AbortOnDrop {
    handle: AbortHandle,
    armed: bool,
}

impl AbortOnDrop {
    fn new(handle: AbortHandle) -> Self {
        Self { handle, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.handle.abort();
        }
    }
}

/// Drains `rx` into SSE frames, then appends whatever terminal frame(s)
/// the driver's outcome requires. Always ends in exactly one sentinel.
///
/// `cancel` is the enclosing cancellation signal: an explicit cancel
/// aborts the driver and yields an `error` frame before the sentinel; a
/// client disconnect (the returned stream dropped without being polled to
/// completion) aborts the driver via `AbortOnDrop` instead, since the
/// generator never gets to run its own cleanup code in that case.
pub fn multiplex(
    conversation_id: String,
    mut rx: mpsc::Receiver<StreamEvent>,
    driver: JoinHandle<Result<(), StageError>>,
    cancel: CancellationToken,
) -> impl Stream<Item = String> {
    async_stream::stream! {
        let mut guard = AbortOnDrop::new(driver.abort_handle());
        let mut content_seen = false;
        let mut total_responses: u64 = 0;
        let mut content_received: u64 = 0;
        let mut cancelled = false;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    guard.handle.abort();
                    break;
                }
                event = rx.recv() => {
                    match event {
                        Some(event) => {
                            if matches!(event, StreamEvent::Content { .. }) {
                                content_seen = true;
                                content_received += 1;
                            }
                            total_responses += 1;
                            yield event.to_sse_frame();
                        }
                        None => break,
                    }
                }
            }
        }

        if cancelled {
            yield StreamEvent::error(
                &conversation_id,
                ErrorCode::StreamError,
                "stream cancelled",
            )
            .to_sse_frame();
            let _ = driver.await;
            guard.disarm();
            yield SENTINEL_FRAME.to_string();
            return;
        }

        let outcome = driver.await;
        guard.disarm();

        match outcome {
            Ok(Ok(())) => {
                if !content_seen {
                    let warning = StreamEvent::content(
                        &conversation_id,
                        "no output was produced for this request",
                    );
                    total_responses += 1;
                    yield warning.to_sse_frame();
                }
                yield StreamEvent::multiplexer_completed(
                    &conversation_id,
                    total_responses,
                    content_received,
                )
                .to_sse_frame();
            }
            Ok(Err(stage_err)) => {
                let code = stage_err.classify();
                yield StreamEvent::error(&conversation_id, code, stage_err.to_string())
                    .to_sse_frame();
            }
            Err(join_err) => {
                let (code, message) = if join_err.is_cancelled() {
                    (ErrorCode::StreamError, "stream cancelled".to_string())
                } else {
                    (ErrorCode::UnknownError, format!("driver task panicked: {join_err}"))
                };
                yield StreamEvent::error(&conversation_id, code, message).to_sse_frame();
            }
        }

        yield SENTINEL_FRAME.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn stream_with_no_content_gets_warning_then_completed_then_sentinel() {
        let (tx, rx) = mpsc::channel(8);
        drop(tx);
        let driver: JoinHandle<Result<(), StageError>> = tokio::spawn(async { Ok(()) });
        let frames: Vec<String> = multiplex("c1".into(), rx, driver, CancellationToken::new())
            .collect()
            .await;
        assert_eq!(frames.len(), 3);
        assert!(frames[0].contains("no output was produced"));
        assert!(frames[1].contains("\"description\":\"all tasks done\""));
        assert_eq!(frames[2], SENTINEL_FRAME);
    }

    #[tokio::test]
    async fn stream_with_content_skips_warning() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(StreamEvent::content("c1", "hi")).await.unwrap();
        drop(tx);
        let driver: JoinHandle<Result<(), StageError>> = tokio::spawn(async { Ok(()) });
        let frames: Vec<String> = multiplex("c1".into(), rx, driver, CancellationToken::new())
            .collect()
            .await;
        assert_eq!(frames.len(), 3);
        assert!(frames[0].contains("\"content\":\"hi\""));
        assert!(frames[2] == SENTINEL_FRAME);
    }

    #[tokio::test]
    async fn driver_error_yields_error_frame_then_sentinel() {
        let (tx, rx) = mpsc::channel::<StreamEvent>(8);
        drop(tx);
        let driver: JoinHandle<Result<(), StageError>> =
            tokio::spawn(async { Err(StageError::Other("boom".into())) });
        let frames: Vec<String> = multiplex("c1".into(), rx, driver, CancellationToken::new())
            .collect()
            .await;
        assert_eq!(frames.len(), 2);
        assert!(frames[0].contains("\"type\":\"error\""));
        assert!(frames[0].contains("boom"));
        assert_eq!(frames[1], SENTINEL_FRAME);
    }

    /// Scenario 6: an explicit cancel mid-stream aborts the still-running
    /// driver and yields one `error` frame (`STREAM_ERROR`) then the
    /// sentinel, rather than waiting for the driver to finish on its own.
    #[tokio::test]
    async fn explicit_cancel_aborts_driver_and_yields_error_then_sentinel() {
        let (_tx, rx) = mpsc::channel::<StreamEvent>(8);
        let cancel = CancellationToken::new();
        let driver: JoinHandle<Result<(), StageError>> = tokio::spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            Ok(())
        });

        let stream = multiplex("c1".into(), rx, driver, cancel.clone());
        tokio::pin!(stream);

        cancel.cancel();
        let frames: Vec<String> = stream.collect().await;

        assert_eq!(frames.len(), 2);
        assert!(frames[0].contains("\"type\":\"error\""));
        assert!(frames[0].contains("STREAM_ERROR"));
        assert_eq!(frames[1], SENTINEL_FRAME);
    }

    /// Dropping the stream before it completes (a client disconnect) aborts
    /// the driver task via `AbortOnDrop`, even though nobody ever called
    /// `cancel.cancel()` or polled the generator to its own cleanup code.
    #[tokio::test]
    async fn dropping_stream_mid_flight_aborts_driver() {
        let (_tx, rx) = mpsc::channel::<StreamEvent>(8);
        let driver: JoinHandle<Result<(), StageError>> = tokio::spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            Ok(())
        });
        let abort_handle = driver.abort_handle();

        {
            let stream = multiplex("c1".into(), rx, driver, CancellationToken::new());
            tokio::pin!(stream);
            // Poll once so the generator actually starts and installs its guard.
            let _ = futures::poll!(stream.next());
        }

        for _ in 0..100 {
            if abort_handle.is_finished() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(abort_handle.is_finished());
    }
}
