//! Synthesis watchdogs
//!
//! Bounds how long an utterance may wait for its audio to be rendered and for
//! the platform to confirm playback began, so a backend that silently never
//! starts cannot hang a turn.

use std::future::Future;
use std::time::Duration;

use tokio::sync::oneshot;

use super::SpeakOutcome;

/// Default window for the platform to confirm playback start
pub const SYNTHESIS_START_TIMEOUT: Duration = Duration::from_millis(2000);

/// Wait for an utterance to start and then finish
///
/// `started` fires when the platform confirms playback began; `finished`
/// carries the final outcome. A finish that arrives before the start
/// confirmation is accepted as is. When `start_timeout` elapses first the
/// result is [`SpeakOutcome::TimedOut`] and the caller must cancel the
/// utterance.
pub async fn await_playback(
    mut started: oneshot::Receiver<()>,
    mut finished: oneshot::Receiver<SpeakOutcome>,
    start_timeout: Duration,
) -> SpeakOutcome {
    let deadline = tokio::time::sleep(start_timeout);
    tokio::pin!(deadline);

    tokio::select! {
        biased;
        outcome = &mut finished => {
            return outcome.unwrap_or(SpeakOutcome::Cancelled);
        }
        result = &mut started => {
            if result.is_err() {
                return SpeakOutcome::Degraded("playback never started".to_string());
            }
        }
        () = &mut deadline => {
            tracing::warn!(
                timeout_ms = start_timeout.as_millis(),
                "synthesis did not start in time"
            );
            return SpeakOutcome::TimedOut;
        }
    }

    finished.await.unwrap_or(SpeakOutcome::Cancelled)
}

/// Wait for the audio of an utterance to be rendered
///
/// A failed render becomes [`SpeakOutcome::Degraded`] and one that outlives
/// `limit` becomes [`SpeakOutcome::TimedOut`].
///
/// # Errors
///
/// Returns the outcome the utterance ends with when no audio is available
pub async fn await_render<T, F>(render: F, limit: Duration) -> Result<T, SpeakOutcome>
where
    F: Future<Output = crate::Result<T>>,
{
    match tokio::time::timeout(limit, render).await {
        Ok(Ok(audio)) => Ok(audio),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "speech synthesis failed");
            Err(SpeakOutcome::Degraded(e.to_string()))
        }
        Err(_) => {
            tracing::warn!(timeout_ms = limit.as_millis(), "speech synthesis stalled");
            Err(SpeakOutcome::TimedOut)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[tokio::test(start_paused = true)]
    async fn test_completes_after_start() {
        let (started_tx, started_rx) = oneshot::channel();
        let (finished_tx, finished_rx) = oneshot::channel();

        tokio::spawn(async move {
            started_tx.send(()).ok();
            tokio::time::sleep(Duration::from_secs(10)).await;
            finished_tx.send(SpeakOutcome::Completed).ok();
        });

        let outcome = await_playback(started_rx, finished_rx, SYNTHESIS_START_TIMEOUT).await;
        assert_eq!(outcome, SpeakOutcome::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_without_start() {
        let (_started_tx, started_rx) = oneshot::channel::<()>();
        let (_finished_tx, finished_rx) = oneshot::channel();

        let begin = tokio::time::Instant::now();
        let outcome = await_playback(started_rx, finished_rx, SYNTHESIS_START_TIMEOUT).await;

        assert_eq!(outcome, SpeakOutcome::TimedOut);
        assert!(begin.elapsed() >= SYNTHESIS_START_TIMEOUT);
        assert!(begin.elapsed() < SYNTHESIS_START_TIMEOUT * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_early_failure_wins() {
        let (_started_tx, started_rx) = oneshot::channel::<()>();
        let (finished_tx, finished_rx) = oneshot::channel();
        finished_tx
            .send(SpeakOutcome::Degraded("not-allowed".to_string()))
            .ok();

        let outcome = await_playback(started_rx, finished_rx, SYNTHESIS_START_TIMEOUT).await;
        assert_eq!(outcome, SpeakOutcome::Degraded("not-allowed".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_finish_is_cancelled() {
        let (started_tx, started_rx) = oneshot::channel();
        let (finished_tx, finished_rx) = oneshot::channel::<SpeakOutcome>();
        started_tx.send(()).ok();
        drop(finished_tx);

        let outcome = await_playback(started_rx, finished_rx, SYNTHESIS_START_TIMEOUT).await;
        assert_eq!(outcome, SpeakOutcome::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_render_times_out() {
        let limit = Duration::from_secs(20);
        let begin = tokio::time::Instant::now();

        let outcome = await_render(std::future::pending::<crate::Result<Vec<f32>>>(), limit).await;

        assert_eq!(outcome, Err(SpeakOutcome::TimedOut));
        assert!(begin.elapsed() >= limit);
        assert!(begin.elapsed() < limit * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_render_failure_degrades() {
        let outcome = await_render(
            async { Err::<Vec<f32>, _>(Error::Tts("quota exceeded".to_string())) },
            Duration::from_secs(20),
        )
        .await;

        assert_eq!(
            outcome,
            Err(SpeakOutcome::Degraded("TTS error: quota exceeded".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rendered_audio_passes_through() {
        let outcome = await_render(async { Ok(vec![0.5_f32; 4]) }, Duration::from_secs(20)).await;
        assert_eq!(outcome, Ok(vec![0.5; 4]));
    }
}
