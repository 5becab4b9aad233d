use std::{sync::Arc, time::Duration};

use rand::Rng;
use tokio::sync::Mutex;

use crate::{
    counter::UnsentCounter,
    db::{Database, ImageRecord, StoreError},
    pictures::PictureStore,
    session::{GateRejection, SessionGate},
    transfer::{TransferResponse, Uploader},
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

const STATUS_ACCEPTED: u16 = 200;
const STATUS_SESSION_EXPIRED: u16 = 401;

/// How one dispatch cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Upload accepted and the record marked sent.
    Delivered(String),
    /// Gate refused: not logged in or offline. Nothing was touched.
    PreconditionFailed(GateRejection),
    /// No eligible records.
    Idle,
    StoreUnavailable,
    /// The chosen record vanished between selection and lease.
    RecordNotFound(String),
    /// Backing file absent, unreadable, or its check crashed or hung.
    FileMissing(String),
    TransportFailure(String),
    /// Server answered 401; the session has been invalidated.
    AuthExpired(String),
    ServerRejected { name: String, status: u16 },
}

/// Runs dispatch cycles: gate, select, lease, verify, transfer, settle.
pub struct Dispatcher {
    db: Database,
    gate: SessionGate,
    pictures: Arc<dyn PictureStore>,
    uploader: Arc<dyn Uploader>,
    counter: Arc<dyn UnsentCounter>,
    presence_timeout: Duration,
    in_flight: Mutex<()>,
}

impl Dispatcher {
    pub fn new(
        db: Database,
        gate: SessionGate,
        pictures: Arc<dyn PictureStore>,
        uploader: Arc<dyn Uploader>,
        counter: Arc<dyn UnsentCounter>,
        presence_timeout: Duration,
    ) -> Self {
        Self {
            db,
            gate,
            pictures,
            uploader,
            counter,
            presence_timeout,
            in_flight: Mutex::new(()),
        }
    }

    /// Runs one full cycle. Concurrent callers are serialized so at most one
    /// cycle is ever in flight.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let _in_flight = self.in_flight.lock().await;

        if let Err(rejection) = self.gate.check() {
            log_debug!("dispatch skipped: {rejection:?}");
            return CycleOutcome::PreconditionFailed(rejection);
        }

        let candidates = match self.db.list_eligible().await {
            Ok(candidates) => candidates,
            Err(err) => return store_failure(err, None),
        };
        let Some(record) = pick_random(candidates) else {
            log_debug!("dispatch idle: no unsent images");
            return CycleOutcome::Idle;
        };
        let name = record.name.clone();

        // The lease is taken before the filesystem is touched: if the check
        // brings the process down, the record stays out of selection.
        if let Err(err) = self.db.lease_acquire(&name).await {
            return store_failure(err, Some(&name));
        }
        let present = self.check_presence(&name).await;
        if let Err(err) = self.db.lease_release(&name).await {
            log_error!("failed to release lease on {}", name);
            return store_failure(err, Some(&name));
        }

        if !present {
            log_warn!("image {} is missing from storage; leaving it queued", name);
            return CycleOutcome::FileMissing(name);
        }

        match self.uploader.upload(&record).await {
            Ok(response) => self.settle(name, response).await,
            Err(err) => {
                log_error!("could not upload {}: {err}", name);
                CycleOutcome::TransportFailure(name)
            }
        }
    }

    async fn check_presence(&self, name: &str) -> bool {
        let pictures = Arc::clone(&self.pictures);
        let check_name = name.to_string();
        let mut check = tokio::spawn(async move { pictures.exists(&check_name).await });

        match tokio::time::timeout(self.presence_timeout, &mut check).await {
            Ok(Ok(present)) => present,
            Ok(Err(join_err)) => {
                log_error!("presence check for {} crashed: {join_err}", name);
                false
            }
            Err(_) => {
                check.abort();
                log_warn!(
                    "presence check for {} timed out (> {:?})",
                    name,
                    self.presence_timeout
                );
                false
            }
        }
    }

    async fn settle(&self, name: String, response: TransferResponse) -> CycleOutcome {
        match response.status {
            STATUS_ACCEPTED => {
                if let Err(err) = self.db.mark_sent(&name).await {
                    log_error!("uploaded {} but could not mark it sent", name);
                    return store_failure(err, Some(&name));
                }
                self.counter.refresh();
                log_info!("successfully uploaded {}", name);
                CycleOutcome::Delivered(name)
            }
            STATUS_SESSION_EXPIRED => {
                log_info!("session expired while uploading {}", name);
                if let Err(err) = self.gate.auth().invalidate_session() {
                    log_error!("failed to clear expired session: {err:?}");
                }
                CycleOutcome::AuthExpired(name)
            }
            status => {
                log_error!("server rejected {} with status {}", name, status);
                CycleOutcome::ServerRejected { name, status }
            }
        }
    }
}

fn store_failure(err: StoreError, name: Option<&str>) -> CycleOutcome {
    match (err, name) {
        (StoreError::NotFound(missing), _) => {
            log_warn!("image {} disappeared before it could be leased", missing);
            CycleOutcome::RecordNotFound(missing)
        }
        (err, Some(name)) => {
            log_error!("image store failed while handling {}: {err}", name);
            CycleOutcome::StoreUnavailable
        }
        (err, None) => {
            log_error!("image store failed: {err}");
            CycleOutcome::StoreUnavailable
        }
    }
}

/// Uniform pick; delivery order carries no meaning.
fn pick_random(mut candidates: Vec<ImageRecord>) -> Option<ImageRecord> {
    if candidates.is_empty() {
        return None;
    }
    let index = rand::thread_rng().gen_range(0..candidates.len());
    Some(candidates.swap_remove(index))
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use chrono::Utc;

    use super::*;
    use crate::dispatch::fakes::{Harness, ScriptedResponse};

    #[tokio::test]
    async fn delivers_accepted_upload() {
        let harness = Harness::new().await;
        harness.add_image("img1.jpg", true).await;
        harness.uploader.push(ScriptedResponse::Status(200));

        let outcome = harness.dispatcher.run_cycle().await;

        assert_eq!(outcome, CycleOutcome::Delivered("img1.jpg".into()));
        let record = harness.db.get_image("img1.jpg").await.unwrap().unwrap();
        assert!(record.sent);
        assert!(record.sent_at.is_some());
        assert!(!record.ignore);
        assert_eq!(harness.counter.refreshes(), 1);
        assert!(harness.db.list_eligible().await.unwrap().is_empty());
        assert_eq!(harness.uploader.attempts(), vec!["img1.jpg".to_string()]);
    }

    #[tokio::test]
    async fn unauthorized_upload_invalidates_session() {
        let harness = Harness::new().await;
        harness.add_image("img2.jpg", true).await;
        harness.uploader.push(ScriptedResponse::Status(401));

        let outcome = harness.dispatcher.run_cycle().await;

        assert_eq!(outcome, CycleOutcome::AuthExpired("img2.jpg".into()));
        let record = harness.db.get_image("img2.jpg").await.unwrap().unwrap();
        assert!(record.is_eligible());
        assert!(!harness.gate.is_authenticated());
        assert_eq!(harness.counter.refreshes(), 0);

        let next = harness.dispatcher.run_cycle().await;
        assert_eq!(
            next,
            CycleOutcome::PreconditionFailed(GateRejection::NotAuthenticated)
        );
        assert_eq!(harness.uploader.attempts().len(), 1);
    }

    #[tokio::test]
    async fn offline_cycle_touches_nothing() {
        let harness = Harness::new().await;
        harness.add_image("img3.jpg", true).await;
        harness.network.set_connected(false);
        let before = harness.db.list_images().await.unwrap();

        let outcome = harness.dispatcher.run_cycle().await;

        assert_eq!(
            outcome,
            CycleOutcome::PreconditionFailed(GateRejection::Offline)
        );
        assert_eq!(harness.db.list_images().await.unwrap(), before);
        assert_eq!(harness.pictures.checks(), 0);
        assert!(harness.uploader.attempts().is_empty());
    }

    #[tokio::test]
    async fn missing_file_releases_lease_without_transfer() {
        let harness = Harness::new().await;
        harness.add_image("img4.jpg", false).await;

        let outcome = harness.dispatcher.run_cycle().await;

        assert_eq!(outcome, CycleOutcome::FileMissing("img4.jpg".into()));
        let record = harness.db.get_image("img4.jpg").await.unwrap().unwrap();
        assert!(record.is_eligible());
        assert!(harness.uploader.attempts().is_empty());
        assert_eq!(harness.pictures.checks(), 1);
    }

    #[tokio::test]
    async fn missing_file_is_retried_every_cycle() {
        let harness = Harness::new().await;
        harness.add_image("stuck.jpg", false).await;

        for _ in 0..3 {
            assert_eq!(
                harness.dispatcher.run_cycle().await,
                CycleOutcome::FileMissing("stuck.jpg".into())
            );
        }
        assert_eq!(harness.pictures.checks(), 3);
    }

    #[tokio::test]
    async fn lease_is_held_during_presence_check() {
        let harness = Harness::new().await;
        harness.add_image("held.jpg", true).await;
        harness.uploader.push(ScriptedResponse::Status(500));

        harness.dispatcher.run_cycle().await;

        assert_eq!(harness.pictures.leased_during_check(), vec![true]);
        let record = harness.db.get_image("held.jpg").await.unwrap().unwrap();
        assert!(!record.ignore);
    }

    #[tokio::test]
    async fn crashing_presence_check_still_releases_lease() {
        let harness = Harness::new().await;
        harness.add_image("boom.jpg", true).await;
        harness.pictures.panic_on("boom.jpg");

        let outcome = harness.dispatcher.run_cycle().await;

        assert_eq!(outcome, CycleOutcome::FileMissing("boom.jpg".into()));
        assert!(harness
            .db
            .get_image("boom.jpg")
            .await
            .unwrap()
            .unwrap()
            .is_eligible());
    }

    #[tokio::test]
    async fn hung_presence_check_times_out_and_releases_lease() {
        let harness = Harness::with_presence_timeout(Duration::from_millis(20)).await;
        harness.add_image("slow.jpg", true).await;
        harness.pictures.hang_on("slow.jpg");
        let holders = Arc::strong_count(&harness.pictures);

        for _ in 0..5 {
            let outcome = harness.dispatcher.run_cycle().await;
            assert_eq!(outcome, CycleOutcome::FileMissing("slow.jpg".into()));
        }
        assert!(harness
            .db
            .get_image("slow.jpg")
            .await
            .unwrap()
            .unwrap()
            .is_eligible());

        // Aborted checks drop their handle on the store once the runtime
        // gets to them.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(Arc::strong_count(&harness.pictures), holders);
        assert_eq!(harness.pictures.checks(), 5);
    }

    #[tokio::test]
    async fn failures_leave_records_eligible() {
        let harness = Harness::new().await;
        harness.add_image("a.jpg", true).await;
        harness.uploader.push(ScriptedResponse::Status(500));
        harness.uploader.push(ScriptedResponse::TransportError);

        let first = harness.dispatcher.run_cycle().await;
        let second = harness.dispatcher.run_cycle().await;

        assert_eq!(
            first,
            CycleOutcome::ServerRejected {
                name: "a.jpg".into(),
                status: 500
            }
        );
        assert_eq!(second, CycleOutcome::TransportFailure("a.jpg".into()));
        assert!(harness
            .db
            .get_image("a.jpg")
            .await
            .unwrap()
            .unwrap()
            .is_eligible());
        assert!(harness.gate.is_authenticated());
    }

    #[tokio::test]
    async fn idle_when_nothing_eligible() {
        let harness = Harness::new().await;
        harness.add_image("done.jpg", true).await;
        harness.db.mark_sent("done.jpg").await.unwrap();

        assert_eq!(harness.dispatcher.run_cycle().await, CycleOutcome::Idle);
        assert_eq!(harness.pictures.checks(), 0);
    }

    #[tokio::test]
    async fn leased_records_are_never_selected() {
        let harness = Harness::new().await;
        harness.add_image("crashed.jpg", true).await;
        harness.db.lease_acquire("crashed.jpg").await.unwrap();

        assert_eq!(harness.dispatcher.run_cycle().await, CycleOutcome::Idle);
    }

    #[tokio::test]
    async fn unavailable_store_aborts_cycle() {
        let harness = Harness::new().await;
        harness.add_image("a.jpg", true).await;
        harness.db.close();

        assert_eq!(
            harness.dispatcher.run_cycle().await,
            CycleOutcome::StoreUnavailable
        );
        assert!(harness.uploader.attempts().is_empty());
    }

    #[tokio::test]
    async fn failing_cycles_never_shrink_the_queue() {
        let harness = Harness::new().await;
        for i in 0..5 {
            harness.add_image(&format!("{i}.jpg"), i % 2 == 0).await;
        }
        for i in 0..20 {
            let response = match i % 3 {
                0 => ScriptedResponse::Status(503),
                1 => ScriptedResponse::TransportError,
                _ => ScriptedResponse::Status(413),
            };
            harness.uploader.push(response);
        }

        let mut eligible = harness.db.list_eligible().await.unwrap().len();
        for _ in 0..20 {
            harness.dispatcher.run_cycle().await;
            let now = harness.db.list_eligible().await.unwrap().len();
            assert!(now >= eligible);
            eligible = now;
        }
        assert_eq!(eligible, 5);
        assert_eq!(harness.counter.refreshes(), 0);
    }

    #[tokio::test]
    async fn selection_reaches_every_eligible_record() {
        let harness = Harness::new().await;
        let names: BTreeSet<String> = (0..4).map(|i| format!("r{i}.jpg")).collect();
        for name in &names {
            harness.add_image(name, true).await;
        }
        for _ in 0..4 {
            harness.uploader.push(ScriptedResponse::Status(200));
        }

        for _ in 0..4 {
            assert!(matches!(
                harness.dispatcher.run_cycle().await,
                CycleOutcome::Delivered(_)
            ));
        }

        let attempted: BTreeSet<String> = harness.uploader.attempts().into_iter().collect();
        assert_eq!(attempted, names);
        assert_eq!(harness.dispatcher.run_cycle().await, CycleOutcome::Idle);
    }

    #[test]
    fn random_pick_is_roughly_uniform() {
        let records: Vec<ImageRecord> = (0..4)
            .map(|i| ImageRecord {
                id: i,
                name: format!("{i}.jpg"),
                size_kb: 1.0,
                created_at: Utc::now(),
                ignore: false,
                sent: false,
                sent_at: None,
                status: -1,
            })
            .collect();

        let mut hits: BTreeMap<String, usize> = BTreeMap::new();
        for _ in 0..4000 {
            let picked = pick_random(records.clone()).unwrap();
            *hits.entry(picked.name).or_default() += 1;
        }

        assert_eq!(hits.len(), 4);
        assert!(hits.values().all(|&count| count > 700));
        assert!(pick_random(Vec::new()).is_none());
    }
}
