//! Print agent main loop.
//!
//! Flow:
//!   1. Resolve identity and printer inventory, register with the API;
//!      retry at a fixed interval until the API accepts the station
//!   2. Loop: fetch pending jobs, merge them into the queue
//!   3. Drain the queue, printing jobs one at a time
//!   4. Sleep `fetching_jobs_timeout`, repeat
//!
//! There is no way back to the unregistered state; a new registration needs
//! a process restart.

use std::sync::Arc;

use log::{debug, error, info};

use crate::api::ApiClient;
use crate::config::AgentConfig;
use crate::error::Result;
use crate::executor::Executor;
use crate::identity::StationIdentity;
use crate::job::JobQueue;
use crate::printer::{self, PrintBackend, PrinterInventory};

/// A registered station.
#[derive(Debug, Clone)]
pub struct Station {
    /// Server-assigned id used in the jobs URL.
    pub id:       String,
    pub identity: StationIdentity,
    /// Inventory snapshot sent at registration.
    pub printers: PrinterInventory,
    /// Registration attempts it took, the accepted one included.
    pub attempts: u64,
}

pub struct Agent<B: PrintBackend> {
    cfg:      Arc<AgentConfig>,
    api:      ApiClient,
    executor: Executor<B>,
    queue:    JobQueue,
}

impl<B: PrintBackend> Agent<B> {
    pub fn new(cfg: Arc<AgentConfig>, backend: Arc<B>) -> Result<Self> {
        let api = ApiClient::new(Arc::clone(&cfg))?;
        let executor = Executor::new(Arc::clone(&cfg), api.clone(), backend);
        Ok(Self { cfg, api, executor, queue: JobQueue::new() })
    }

    /// Register, then poll and print forever.
    pub async fn run(mut self) {
        let station = self.register().await;
        info!(
            "registered {} as print server {} with {} printers after {} attempts",
            station.identity.mac_address,
            station.id,
            station.printers.len(),
            station.attempts
        );
        loop {
            self.poll_once(&station).await;
            self.drain().await;
            tokio::time::sleep(self.cfg.fetching_jobs_timeout).await;
        }
    }

    /// Register this station, retrying until the API accepts it.
    pub async fn register(&self) -> Station {
        let mut try_number: u64 = 0;
        loop {
            info!("Try to register on {}... {try_number}", self.cfg.api_url);
            match self.try_register(try_number + 1).await {
                Ok(station) => return station,
                Err(e) if e.is_connect() => error!("Connection error: {e}"),
                Err(e) => error!("registration failed: {e:?}"),
            }
            try_number += 1;
            tokio::time::sleep(self.cfg.connection_retry_timeout).await;
        }
    }

    async fn try_register(&self, attempts: u64) -> Result<Station> {
        let identity = StationIdentity::resolve(&self.cfg);
        let printers = self.executor.backend().list_printers().await?;

        info!(
            "Register {:?} (uid={}, ip={})",
            identity.hostname, identity.mac_address, identity.ip
        );
        printer::log_inventory(&printers);

        let reg = self.api.register(&identity, &printers).await?;
        debug!("registration answer: {}", reg.answer);
        Ok(Station { id: reg.print_server_id, identity, printers, attempts })
    }

    /// Fetch pending jobs into the queue; returns how many were queued.
    /// Fetch failures count as zero jobs.
    pub async fn poll_once(&mut self, station: &Station) -> usize {
        let jobs = match self.api.fetch_jobs(&station.id).await {
            Ok(jobs) => jobs,
            Err(e) if e.is_connect() => {
                error!("API server unavailable ({}): {e}", self.cfg.api_url);
                return 0;
            }
            Err(e) => {
                error!("fetching jobs failed: {e:?}");
                return 0;
            }
        };
        if !jobs.is_empty() {
            info!("Tasks {} incoming", jobs.len());
        }
        self.queue.merge(jobs)
    }

    /// Print every queued job, one at a time; returns how many were attempted.
    pub async fn drain(&mut self) -> usize {
        let mut attempted = 0;
        while let Some(job) = self.queue.pop() {
            debug!("{job}");
            self.executor.execute(&job).await;
            attempted += 1;
        }
        attempted
    }

    #[cfg(test)]
    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }
}
