//! Competing fetch attempts against the holders of one chunk part.
//!
//! The first attempt starts right away. Whenever the current wave stays
//! silent for the wave read timeout, or an attempt fails, another
//! attempt is launched against the next holder, while every earlier
//! attempt keeps running. The first reply of the right length wins and
//! every other attempt is aborted, which abandons its connection.

use super::back_off::BackOffList;
use bytes::Bytes;
use chunkread_api::{config::ReadConfig, transport::*, *};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::unbounded_channel;
use tokio::task::JoinSet;
use tokio::time::Instant;

/// Where an attempt stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AttemptState {
    Pending,
    Succeeded,
    Failed,
    Abandoned,
}

/// One attempt against one holder.
#[derive(Debug)]
pub(crate) struct WaveAttempt {
    pub holder: HolderAddr,
    pub started_at: Instant,
    pub finished_at: Option<Instant>,
    pub state: AttemptState,
}

impl WaveAttempt {
    fn finish(&mut self, state: AttemptState) {
        self.state = state;
        self.finished_at = Some(Instant::now());
    }
}

/// Closes the connection when the attempt holding it is dropped before
/// it could hand over a good reply.
struct AbandonGuard {
    con: DynConnection,
    armed: bool,
}

impl AbandonGuard {
    fn new(con: DynConnection) -> Self {
        Self { con, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if self.armed {
            self.con.abandon();
        }
    }
}

/// Runs part fetches for one session.
#[derive(Debug)]
pub(crate) struct WaveScheduler {
    config: Arc<ReadConfig>,
    transport: DynTransport,
    back_off_list: Mutex<BackOffList>,
}

impl WaveScheduler {
    pub fn new(config: Arc<ReadConfig>, transport: DynTransport) -> Self {
        Self {
            config,
            transport,
            back_off_list: Mutex::new(BackOffList::default()),
        }
    }

    #[cfg(test)]
    pub fn is_on_back_off(&self, addr: &HolderAddr) -> bool {
        self.back_off_list
            .lock()
            .unwrap()
            .is_holder_on_back_off(addr)
    }

    /// Fetch `request` from whichever of `holders` answers first.
    ///
    /// Fails with [ReadError::AllHoldersFailed] once the retry budget is
    /// used up and no attempt is left running, or with
    /// [ReadError::TotalTimeout] once `deadline` passes.
    pub async fn fetch(
        &self,
        request: PartRequest,
        holders: &[HolderAddr],
        deadline: Instant,
    ) -> ReadResult<Bytes> {
        if request.length == 0 {
            return Ok(Bytes::new());
        }
        if holders.is_empty() {
            return Err(ReadError::AllHoldersFailed {
                chunk_id: request.chunk_id,
                attempts: 0,
            });
        }

        let order = self.back_off_list.lock().unwrap().order(holders);
        let budget = self.config.retries as usize;
        let wave_timeout = self.config.wave_read_timeout();

        let (result_send, mut result_recv) =
            unbounded_channel::<(usize, ReadResult<Bytes>)>();
        let mut tasks = JoinSet::new();
        let mut attempts: Vec<WaveAttempt> = Vec::new();
        let mut launch = true;
        let mut wave_deadline = Instant::now();

        loop {
            if launch {
                launch = false;
                wave_deadline = Instant::now() + wave_timeout;

                if attempts.len() < budget {
                    if let Some((holder, not_before)) = next_holder(
                        &order,
                        &attempts,
                        self.config.round_trip_time(),
                    ) {
                        let id = attempts.len();
                        tracing::trace!(
                            chunk_id = %request.chunk_id,
                            part = %request.part,
                            %holder,
                            id,
                            "launching attempt"
                        );
                        if let Some(not_before) = not_before {
                            wave_deadline = not_before.max(Instant::now())
                                + wave_timeout;
                        }

                        let transport = self.transport.clone();
                        let connect_timeout = self.config.connect_timeout();
                        let result_send = result_send.clone();
                        let addr = holder.clone();
                        tasks.spawn(async move {
                            let res = attempt(
                                transport,
                                addr,
                                request,
                                not_before,
                                connect_timeout,
                                deadline,
                            )
                            .await;
                            let _ = result_send.send((id, res));
                        });

                        attempts.push(WaveAttempt {
                            holder,
                            started_at: Instant::now(),
                            finished_at: None,
                            state: AttemptState::Pending,
                        });
                    }
                }
            }

            if !attempts.iter().any(|a| a.state == AttemptState::Pending) {
                tracing::debug!(
                    chunk_id = %request.chunk_id,
                    part = %request.part,
                    attempts = attempts.len(),
                    "every attempt failed"
                );
                return Err(ReadError::AllHoldersFailed {
                    chunk_id: request.chunk_id,
                    attempts: attempts.len() as u32,
                });
            }

            tokio::select! {
                Some((id, res)) = result_recv.recv() => match res {
                    Ok(data) => {
                        tasks.abort_all();
                        attempts[id].finish(AttemptState::Succeeded);
                        self.settle(&mut attempts, id, wave_timeout);
                        return Ok(data);
                    }
                    Err(err) => {
                        let holder = &attempts[id].holder;
                        if err.is_attempt_error() {
                            tracing::debug!(
                                chunk_id = %request.chunk_id,
                                part = %request.part,
                                %holder,
                                ?err,
                                "attempt failed"
                            );
                        } else {
                            // transports should only report node errors
                            tracing::warn!(
                                chunk_id = %request.chunk_id,
                                part = %request.part,
                                %holder,
                                ?err,
                                "attempt failed with unexpected error"
                            );
                        }
                        attempts[id].finish(AttemptState::Failed);
                        self.back_off_list
                            .lock()
                            .unwrap()
                            .back_off_holder(&attempts[id].holder);
                        launch = true;
                    }
                },
                _ = tokio::time::sleep_until(wave_deadline),
                    if attempts.len() < budget =>
                {
                    if let Some(last) = attempts
                        .iter()
                        .rev()
                        .find(|a| a.state == AttemptState::Pending)
                    {
                        let err = ReadError::WaveTimeout {
                            addr: last.holder.clone(),
                            timeout_ms: wave_timeout.as_millis() as u64,
                        };
                        tracing::trace!(
                            chunk_id = %request.chunk_id,
                            %err,
                            "starting next wave"
                        );
                    }
                    launch = true;
                }
                _ = tokio::time::sleep_until(deadline) => {
                    tasks.abort_all();
                    tracing::debug!(
                        chunk_id = %request.chunk_id,
                        part = %request.part,
                        attempts = attempts.len(),
                        "fetch deadline passed"
                    );
                    let timeout_ms =
                        self.config.chunkserver_total_read_timeout_ms;
                    return Err(ReadError::TotalTimeout {
                        timeout_ms: timeout_ms.into(),
                    });
                }
            }
        }
    }

    /// Bookkeeping once attempt `winner` delivered: losers are marked
    /// abandoned, those that stayed silent for a whole wave are put on
    /// back off, the winner is taken off it.
    fn settle(
        &self,
        attempts: &mut [WaveAttempt],
        winner: usize,
        wave_timeout: Duration,
    ) {
        let now = Instant::now();
        let mut back_off_list = self.back_off_list.lock().unwrap();
        for a in attempts.iter_mut() {
            if a.state == AttemptState::Pending {
                a.finish(AttemptState::Abandoned);
                if now.duration_since(a.started_at) >= wave_timeout {
                    back_off_list.back_off_holder(&a.holder);
                }
            }
        }
        back_off_list.remove_holder(&attempts[winner].holder);
    }
}

/// Pick the holder for the next wave.
///
/// Holders that were not tried yet come first, in `order`. After that,
/// holders whose last attempt failed are retried, the longest-failed
/// first, but not before one round trip has passed since the failure.
/// Holders with an attempt still running are never picked twice.
fn next_holder(
    order: &[HolderAddr],
    attempts: &[WaveAttempt],
    round_trip_time: Duration,
) -> Option<(HolderAddr, Option<Instant>)> {
    if let Some(h) = order
        .iter()
        .find(|h| !attempts.iter().any(|a| &a.holder == *h))
    {
        return Some((h.clone(), None));
    }

    order
        .iter()
        .filter(|h| {
            !attempts.iter().any(|a| {
                &a.holder == *h && a.state == AttemptState::Pending
            })
        })
        .filter_map(|h| {
            let failed_at = attempts
                .iter()
                .filter(|a| &a.holder == h)
                .filter_map(|a| a.finished_at)
                .max()?;
            Some((h, failed_at))
        })
        .min_by_key(|(_, failed_at)| *failed_at)
        .map(|(h, failed_at)| (h.clone(), Some(failed_at + round_trip_time)))
}

async fn attempt(
    transport: DynTransport,
    addr: HolderAddr,
    request: PartRequest,
    not_before: Option<Instant>,
    connect_timeout: Duration,
    deadline: Instant,
) -> ReadResult<Bytes> {
    if let Some(not_before) = not_before {
        tokio::time::sleep_until(not_before).await;
    }

    let con = match tokio::time::timeout(
        connect_timeout,
        transport.connect(addr.clone(), connect_timeout),
    )
    .await
    {
        Ok(con) => con?,
        Err(_) => return Err(ReadError::connect(addr)),
    };
    let guard = AbandonGuard::new(con);

    let read_timeout = deadline.saturating_duration_since(Instant::now());
    let data = guard.con.fetch(request, read_timeout).await?;

    if data.len() as u64 != request.length {
        return Err(ReadError::fetch(
            addr,
            format!(
                "malformed reply of {} bytes, expected {}",
                data.len(),
                request.length
            ),
        ));
    }

    guard.disarm();
    Ok(data)
}

#[cfg(test)]
mod test;
