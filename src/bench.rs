use crate::client::Client;
use crate::config::{ClientCommand, Config, Target};
use crate::error::{Error, Result};
use crate::pool::LocalClientPool;
use crate::progress::{NullProgress, ProgressSink};
use crate::recorder::ResultRecorder;
use crate::stats::RttAggregate;
use log::{debug, warn};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio::task::JoinSet;
use tokio::time::sleep;

/// The message benchmark: grows the client population step by step, holds a
/// bounded number of probes in flight, and collects exactly `sample_size`
/// outcomes (RTT samples plus drops) per step before recording aggregates.
///
/// The run terminates after `total_steps` steps. When `total_steps` is zero
/// it instead terminates at the end of the first step whose limit-percentile
/// RTT exceeds `limit_rtt`.
pub struct Benchmark {
    config: Config,
    target: Arc<Target>,
    pools: Vec<Arc<LocalClientPool>>,
    recorder: Box<dyn ResultRecorder>,
    progress: Arc<dyn ProgressSink>,
    clients: Vec<Arc<Client>>,
    /// Creation attempts so far, used to route client i to pool i % pools.
    created: usize,
    rtt_tx: Sender<Duration>,
    rtt_rx: Receiver<Duration>,
    err_tx: Sender<Error>,
    err_rx: Receiver<Error>,
}

impl Benchmark {
    pub fn new(
        config: Config,
        target: Arc<Target>,
        pools: Vec<Arc<LocalClientPool>>,
        recorder: Box<dyn ResultRecorder>,
    ) -> Self {
        // Capacity one is the closest bounded analogue of a rendezvous:
        // producers block until the controller drains, which is what makes
        // `concurrent` the in-flight throttle.
        let (rtt_tx, rtt_rx) = channel(1);
        let (err_tx, err_rx) = channel(1);

        Benchmark {
            config,
            target,
            pools,
            recorder,
            progress: Arc::new(NullProgress),
            clients: Vec::new(),
            created: 0,
            rtt_tx,
            rtt_rx,
            err_tx,
            err_rx,
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub async fn run(&mut self) -> Result<()> {
        let initial = if self.config.initial_clients == 0 {
            self.config.step_size
        } else {
            self.config.initial_clients
        };
        self.start_clients(initial).await?;

        let mut step_num = 0usize;
        let mut drop = 0usize;
        let mut expected_rx_broadcasts = 0usize;

        loop {
            step_num += 1;
            let mut step_drop = 0usize;
            let mut in_flight = 0usize;

            self.progress.begin(self.config.sample_size);

            for _ in 0..self.config.concurrent {
                match self.send_to_random_client().await {
                    Ok(()) => in_flight += 1,
                    Err(err) => {
                        debug!("send error: {err}");
                        step_drop += 1;
                    }
                }
            }

            let mut agg = RttAggregate::new();
            while agg.count() + step_drop < self.config.sample_size {
                tokio::select! {
                    Some(rtt) = self.rtt_rx.recv() => {
                        agg.add(rtt);
                        self.progress.tick();
                        in_flight = in_flight.saturating_sub(1);
                    }
                    Some(err) = self.err_rx.recv() => {
                        debug!("error: {err}");
                        step_drop += 1;
                    }
                }

                // Issue a replacement probe only while the outcomes already
                // settled plus those still in flight leave room, so exactly
                // sample_size outcomes are produced.
                if agg.count() + in_flight + step_drop < self.config.sample_size {
                    match self.send_to_random_client().await {
                        Ok(()) => in_flight += 1,
                        Err(err) => {
                            debug!("send error: {err}");
                            step_drop += 1;
                        }
                    }
                }
            }

            self.progress.finish();

            drop += step_drop;
            expected_rx_broadcasts +=
                self.clients.len().saturating_sub(drop) * self.config.sample_size;

            let finished = (self.config.total_steps > 0 && step_num == self.config.total_steps)
                || (self.config.total_steps == 0
                    && agg.percentile(self.config.limit_percentile) > self.config.limit_rtt);

            if finished && self.config.client_cmd == ClientCommand::Broadcast {
                // Result acks can overtake the fan-out deliveries, so give
                // stragglers a moment before settling the count.
                sleep(self.config.wait_broadcasts).await;

                let total: usize = self
                    .clients
                    .iter()
                    .map(|client| client.reset_rx_broadcast_count())
                    .sum();
                if total < expected_rx_broadcasts {
                    self.recorder.message(&format!(
                        "Missing received broadcasts: expected {expected_rx_broadcasts}, got {total}"
                    ));
                } else if total > expected_rx_broadcasts {
                    self.recorder.message(&format!(
                        "Extra received broadcasts: expected {expected_rx_broadcasts}, got {total}"
                    ));
                }
            }

            self.recorder.record(
                self.clients.len().saturating_sub(drop),
                self.config.limit_percentile,
                agg.percentile(self.config.limit_percentile),
                agg.min(),
                agg.percentile(50),
                agg.max(),
            )?;

            if finished {
                self.recorder.flush()?;
                return Ok(());
            }

            if self.config.interactive {
                prompt_to_continue().await;
            }

            if !self.config.step_delay.is_zero() {
                sleep(self.config.step_delay).await;
            }

            self.start_clients(self.config.step_size).await?;
        }
    }

    /// Creates `total` clients in waves of `concurrent_connect`, each wave
    /// fully joined before the next begins. A failure is fatal only while the
    /// client list is still empty (the initial population); afterwards it is
    /// logged and the slot simply stays unfilled.
    async fn start_clients(&mut self, total: usize) -> Result<()> {
        let had_clients = !self.clients.is_empty();
        let parallelism = self.config.concurrent_connect.max(1);

        self.progress.begin(total);

        let mut created = 0;
        while created < total {
            let wave = parallelism.min(total - created);
            let mut tasks: JoinSet<Result<Arc<Client>>> = JoinSet::new();

            for _ in 0..wave {
                let pool = Arc::clone(&self.pools[self.created % self.pools.len()]);
                self.created += 1;
                let target = Arc::clone(&self.target);
                let rtt_tx = self.rtt_tx.clone();
                let err_tx = self.err_tx.clone();
                tasks.spawn(async move { pool.spawn_client(target, rtt_tx, err_tx).await });
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(Ok(client)) => {
                        self.clients.push(client);
                        self.progress.tick();
                    }
                    Ok(Err(err)) if had_clients => warn!("client connect failed: {err}"),
                    Ok(Err(err)) => return Err(err),
                    Err(join_err) => return Err(Error::TaskAborted(join_err.to_string())),
                }
            }

            created += wave;
        }

        self.progress.finish();
        Ok(())
    }

    /// Picks uniformly from the full client list, deliberately including
    /// clients whose receive loop has already died; the failed send then
    /// counts against the step. Models per-probe jitter before sending.
    async fn send_to_random_client(&self) -> Result<()> {
        assert!(!self.clients.is_empty(), "no clients to send to");

        if !self.config.command_delay.is_zero()
            && self.config.command_delay_chance > rand::thread_rng().gen_range(0..100)
        {
            sleep(self.config.command_delay).await;
        }

        let index = rand::thread_rng().gen_range(0..self.clients.len());
        let client = &self.clients[index];

        match self.config.client_cmd {
            ClientCommand::Echo => client.send_echo().await,
            ClientCommand::Broadcast => client.send_broadcast().await,
        }
    }
}

pub(crate) async fn prompt_to_continue() {
    println!("Press Enter to continue to the next step");
    let _ = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        let _ = std::io::stdin().read_line(&mut line);
    })
    .await;
}
