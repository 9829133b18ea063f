use crate::bench::prompt_to_continue;
use crate::config::{Config, Target};
use crate::error::{Error, Result};
use crate::pool::LocalClientPool;
use crate::progress::{NullProgress, ProgressSink};
use crate::recorder::ResultRecorder;
use crate::stats::RttAggregate;
use log::debug;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio::task::JoinSet;
use tokio::time::sleep;

/// The connect benchmark: spawns fresh clients and measures how long each
/// takes to reach a usable subscription. Every new client emits exactly one
/// sample through the connect-only adapter; the controller collects
/// `step_size` outcomes per step and stops after `total_steps` steps.
pub struct ConnectBenchmark {
    config: Config,
    target: Arc<Target>,
    pools: Vec<Arc<LocalClientPool>>,
    recorder: Box<dyn ResultRecorder>,
    progress: Arc<dyn ProgressSink>,
    clients_count: Arc<AtomicUsize>,
    res_tx: Sender<Duration>,
    res_rx: Receiver<Duration>,
    err_tx: Sender<Error>,
    err_rx: Receiver<Error>,
}

impl ConnectBenchmark {
    pub fn new(
        config: Config,
        target: Arc<Target>,
        pools: Vec<Arc<LocalClientPool>>,
        recorder: Box<dyn ResultRecorder>,
    ) -> Self {
        let (res_tx, res_rx) = channel(1);
        let (err_tx, err_rx) = channel(1);

        ConnectBenchmark {
            config,
            target,
            pools,
            recorder,
            progress: Arc::new(NullProgress),
            clients_count: Arc::new(AtomicUsize::new(0)),
            res_tx,
            res_rx,
            err_tx,
            err_rx,
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub async fn run(&mut self) -> Result<()> {
        let mut step_num = 0usize;
        let mut drop = 0usize;

        loop {
            step_num += 1;
            let mut step_drop = 0usize;

            self.progress.begin(self.config.step_size);

            // The wave driver runs alongside the drain loop: creation errors
            // arrive on the error channel while clients are still being
            // spawned.
            self.spawn_creation_waves();

            let mut agg = RttAggregate::new();
            while agg.count() + step_drop < self.config.step_size {
                tokio::select! {
                    Some(rtt) = self.res_rx.recv() => {
                        agg.add(rtt);
                        self.progress.tick();
                    }
                    Some(err) = self.err_rx.recv() => {
                        debug!("drop: {err}");
                        step_drop += 1;
                        self.progress.tick();
                    }
                }
            }

            self.progress.finish();

            drop += step_drop;

            self.recorder.record(
                self.clients_count.load(Ordering::Relaxed).saturating_sub(drop),
                self.config.limit_percentile,
                agg.percentile(self.config.limit_percentile),
                agg.min(),
                agg.percentile(50),
                agg.max(),
            )?;

            if self.config.total_steps > 0 && step_num == self.config.total_steps {
                self.recorder.flush()?;
                return Ok(());
            }

            if self.config.interactive {
                prompt_to_continue().await;
            }

            if !self.config.step_delay.is_zero() {
                sleep(self.config.step_delay).await;
            }
        }
    }

    /// Creates `step_size` clients in waves of `concurrent`, reporting
    /// failures on the error channel so they count as drops.
    fn spawn_creation_waves(&self) {
        let total = self.config.step_size;
        let parallelism = self.config.concurrent.max(1);
        let command_delay = self.config.command_delay;
        let delay_chance = self.config.command_delay_chance;
        let pools = self.pools.clone();
        let target = Arc::clone(&self.target);
        let clients_count = Arc::clone(&self.clients_count);
        let res_tx = self.res_tx.clone();
        let err_tx = self.err_tx.clone();

        tokio::spawn(async move {
            let mut created = 0;
            while created < total {
                let wave = parallelism.min(total - created);
                let mut tasks = JoinSet::new();

                for _ in 0..wave {
                    let index = clients_count.fetch_add(1, Ordering::Relaxed);
                    let pool = Arc::clone(&pools[index % pools.len()]);
                    let target = Arc::clone(&target);
                    let res_tx = res_tx.clone();
                    let err_tx = err_tx.clone();

                    tasks.spawn(async move {
                        if !command_delay.is_zero()
                            && delay_chance > rand::thread_rng().gen_range(0..100)
                        {
                            sleep(command_delay).await;
                        }
                        if let Err(err) = pool.spawn_client(target, res_tx, err_tx.clone()).await
                        {
                            let _ = err_tx.send(err).await;
                        }
                    });
                }

                while tasks.join_next().await.is_some() {}
                created += wave;
            }
        });
    }
}
