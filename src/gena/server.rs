//! Moteur d'eventing côté device.
//!
//! Tient la table des abonnements (SID → bail, callbacks, séquence),
//! répond aux requêtes `SUBSCRIBE`/`UNSUBSCRIBE`, pousse l'événement
//! initial puis les changements d'état, et applique la modération
//! par variable (`eventMaximumRate`, `eventMinimumDelta`).
//!
//! La livraison passe par une file unique : pour un SID donné les NOTIFY
//! partent donc en ordre de séquence. Un échec de livraison marque
//! l'abonnement périmé et le retire.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Sender};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::UpnpConfig;
use crate::gena::propertyset::encode_property_set;
use crate::gena::subscription::{
    parse_callback_header, EventSequence, LocalSubscription, Sid, Timeout,
};
use crate::gena::{NTS_PROPCHANGE, NT_UPNP_EVENT};
use crate::model::StateVariable;
use crate::service::{ServiceKey, ServiceManager, StatePublisher};
use crate::transport::{
    StreamClient, StreamMethod, StreamRequestMessage, StreamResponseMessage,
};

/// Erreurs du protocole GENA côté serveur.
#[derive(Debug, Clone, Error)]
pub enum GenaServerError {
    #[error("unknown SID")]
    UnknownSid,

    #[error("malformed subscription request: {0}")]
    BadRequest(String),
}

struct SubscriptionEntry {
    subscription: LocalSubscription,
    key: ServiceKey,
}

struct ModerationEntry {
    last_sent: Option<Instant>,
    last_numeric: Option<i64>,
    /// Valeur coalescée en attente, et si c'est le delta qui la retient.
    pending: Option<(String, bool)>,
}

struct DeliveryJob {
    sid: Sid,
    callbacks: Vec<Url>,
    seq: u32,
    body: String,
}

/// Serveur GENA.
pub struct EventServer {
    min_lease_secs: u32,
    max_lease_secs: u32,
    subscriptions: Arc<Mutex<HashMap<Sid, SubscriptionEntry>>>,
    moderation: Mutex<HashMap<(ServiceKey, String), ModerationEntry>>,
    // `None` après shutdown ; fermer le canal termine le worker.
    delivery_tx: Mutex<Option<Sender<DeliveryJob>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EventServer {
    /// `client` livre les NOTIFY ; en production un [`StreamClient`] ureq
    /// avec le timeout court de `notify_timeout_ms`.
    pub fn new(config: &UpnpConfig, client: Arc<dyn StreamClient>) -> Self {
        let subscriptions: Arc<Mutex<HashMap<Sid, SubscriptionEntry>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let (delivery_tx, delivery_rx) = unbounded::<DeliveryJob>();

        let worker_subs = subscriptions.clone();
        let worker = std::thread::Builder::new()
            .name("gena-notify".to_string())
            .spawn(move || {
                while let Ok(job) = delivery_rx.recv() {
                    if !deliver(client.as_ref(), &job) {
                        // Abonné injoignable : l'abonnement est périmé.
                        if worker_subs.lock().unwrap().remove(&job.sid).is_some() {
                            info!("❌ subscriber {} unreachable, subscription dropped", job.sid);
                        }
                    }
                }
            })
            .expect("spawning the GENA delivery thread cannot fail");

        Self {
            min_lease_secs: config.min_lease_secs,
            max_lease_secs: config.max_lease_secs,
            subscriptions,
            moderation: Mutex::new(HashMap::new()),
            delivery_tx: Mutex::new(Some(delivery_tx)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Traite une requête HTTP `SUBSCRIBE`/`UNSUBSCRIBE` sur l'URL
    /// d'eventing d'un service local.
    pub fn handle_request(
        &self,
        request: &StreamRequestMessage,
        key: &ServiceKey,
        manager: &ServiceManager,
    ) -> StreamResponseMessage {
        match request.method {
            StreamMethod::Subscribe => self.handle_subscribe(request, key, manager),
            StreamMethod::Unsubscribe => {
                let Some(sid) = request.headers.get("SID").and_then(|s| s.parse::<Sid>().ok())
                else {
                    return StreamResponseMessage::new(412);
                };
                if self.unsubscribe(&sid) {
                    StreamResponseMessage::new(200)
                } else {
                    StreamResponseMessage::new(412)
                }
            }
            _ => StreamResponseMessage::new(405),
        }
    }

    fn handle_subscribe(
        &self,
        request: &StreamRequestMessage,
        key: &ServiceKey,
        manager: &ServiceManager,
    ) -> StreamResponseMessage {
        let sid_header = request.headers.get("SID");
        let nt = request.headers.get("NT");
        let callback = request.headers.get("CALLBACK");
        let requested = request.headers.get("TIMEOUT").and_then(Timeout::parse);

        if let Some(sid_value) = sid_header {
            // Renouvellement : SID seul, sans NT ni CALLBACK.
            if nt.is_some() || callback.is_some() {
                return StreamResponseMessage::new(400);
            }
            let Ok(sid) = sid_value.parse::<Sid>() else {
                return StreamResponseMessage::new(412);
            };
            return match self.renew(&sid, requested) {
                Ok(granted) => StreamResponseMessage::new(200)
                    .with_header("SID", sid.to_string())
                    .with_header("TIMEOUT", Timeout::Seconds(granted).to_string()),
                Err(_) => StreamResponseMessage::new(412),
            };
        }

        // Nouvel abonnement : NT: upnp:event et CALLBACK obligatoires.
        if nt != Some(NT_UPNP_EVENT) {
            return StreamResponseMessage::new(412);
        }
        let callbacks = callback.map(parse_callback_header).unwrap_or_default();
        if callbacks.is_empty() {
            return StreamResponseMessage::new(412);
        }

        let (sid, granted) = self.subscribe(key.clone(), callbacks, requested, manager);
        StreamResponseMessage::new(200)
            .with_header("SID", sid.to_string())
            .with_header("TIMEOUT", Timeout::Seconds(granted).to_string())
    }

    /// Enregistre un abonnement et met l'événement initial en file.
    pub fn subscribe(
        &self,
        key: ServiceKey,
        callbacks: Vec<Url>,
        requested: Option<Timeout>,
        manager: &ServiceManager,
    ) -> (Sid, u32) {
        let granted = requested
            .unwrap_or(Timeout::Seconds(self.max_lease_secs))
            .clamp_seconds(self.min_lease_secs, self.max_lease_secs);

        let sid = Sid::random();
        let subscription = LocalSubscription {
            sid: sid.clone(),
            callbacks: callbacks.clone(),
            expires_at: Instant::now() + Duration::from_secs(granted as u64),
            sequence: EventSequence::initial(),
        };

        info!(
            "🔒 new subscription {} on {} (Second-{})",
            sid, key.1, granted
        );

        // L'état initial est lu via le gestionnaire, puis envoyé avec
        // SEQ 0 avant tout autre événement (file FIFO).
        let initial = manager.read_initial_event_state();

        let mut subs = self.subscriptions.lock().unwrap();
        let entry = subs.entry(sid.clone()).or_insert(SubscriptionEntry {
            subscription,
            key,
        });
        let seq = entry.subscription.sequence.next();
        let job = DeliveryJob {
            sid: sid.clone(),
            callbacks,
            seq,
            body: encode_property_set(&initial),
        };
        drop(subs);

        self.enqueue(job);
        (sid, granted)
    }

    fn enqueue(&self, job: DeliveryJob) {
        if let Some(tx) = self.delivery_tx.lock().unwrap().as_ref() {
            let _ = tx.send(job);
        }
    }

    /// Prolonge un bail ; erreur si le SID est inconnu.
    pub fn renew(&self, sid: &Sid, requested: Option<Timeout>) -> Result<u32, GenaServerError> {
        let granted = requested
            .unwrap_or(Timeout::Seconds(self.max_lease_secs))
            .clamp_seconds(self.min_lease_secs, self.max_lease_secs);
        let mut subs = self.subscriptions.lock().unwrap();
        let entry = subs.get_mut(sid).ok_or(GenaServerError::UnknownSid)?;
        entry.subscription.expires_at = Instant::now() + Duration::from_secs(granted as u64);
        debug!("♻️ renewed {} for Second-{}", sid, granted);
        Ok(granted)
    }

    pub fn unsubscribe(&self, sid: &Sid) -> bool {
        let removed = self.subscriptions.lock().unwrap().remove(sid).is_some();
        if removed {
            info!("unsubscribed {}", sid);
        }
        removed
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().unwrap().len()
    }

    pub fn has_subscription(&self, sid: &Sid) -> bool {
        self.subscriptions.lock().unwrap().contains_key(sid)
    }

    /// Retire les abonnements dont le bail est écoulé.
    pub fn remove_expired(&self) {
        let now = Instant::now();
        let mut subs = self.subscriptions.lock().unwrap();
        subs.retain(|sid, entry| {
            let live = !entry.subscription.is_expired(now);
            if !live {
                info!("⏳ subscription {} expired", sid);
            }
            live
        });
    }

    /// Envoie les valeurs retenues par la modération de débit dont la
    /// fenêtre est écoulée. Appelé périodiquement par la maintenance.
    pub fn flush_moderated(&self, policies: &dyn Fn(&ServiceKey, &str) -> Option<u64>) {
        let due: Vec<(ServiceKey, String, String)> = {
            let mut moderation = self.moderation.lock().unwrap();
            let mut due = Vec::new();
            for ((key, variable), entry) in moderation.iter_mut() {
                let Some((_, delta_suppressed)) = &entry.pending else {
                    continue;
                };
                // Une valeur retenue par le delta ne part que débloquée
                // par un changement suffisant, jamais par le temps.
                if *delta_suppressed {
                    continue;
                }
                let rate = policies(key, variable).unwrap_or(0);
                let window_elapsed = entry
                    .last_sent
                    .map(|t| t.elapsed() >= Duration::from_millis(rate))
                    .unwrap_or(true);
                if window_elapsed {
                    if let Some((value, _)) = entry.pending.take() {
                        entry.last_sent = Some(Instant::now());
                        entry.last_numeric = value.parse::<i64>().ok().or(entry.last_numeric);
                        due.push((key.clone(), variable.clone(), value));
                    }
                }
            }
            due
        };
        for (key, variable, value) in due {
            self.dispatch(&key, vec![(variable, value)]);
        }
    }

    /// Point d'entrée des changements d'état (implémente
    /// [`StatePublisher`]). Applique la modération puis distribue.
    fn moderated_publish(&self, key: &ServiceKey, variable: &StateVariable, value: String) {
        let policy = variable.event_policy();
        let moderation_key = (key.clone(), variable.name().to_string());

        let decision = {
            let mut moderation = self.moderation.lock().unwrap();
            let entry = moderation
                .entry(moderation_key)
                .or_insert(ModerationEntry {
                    last_sent: None,
                    last_numeric: None,
                    pending: None,
                });

            let numeric = value.parse::<i64>().ok();
            if let (Some(delta), Some(new_num), Some(last_num)) =
                (policy.min_delta, numeric, entry.last_numeric)
            {
                if (new_num - last_num).abs() < delta {
                    // Jamais perdue : coalescée jusqu'au prochain
                    // changement franchissant le delta.
                    entry.pending = Some((value, true));
                    return;
                }
            }
            if let (Some(rate), Some(last_sent)) = (policy.max_rate_ms, entry.last_sent) {
                if last_sent.elapsed() < Duration::from_millis(rate) {
                    entry.pending = Some((value, false));
                    return;
                }
            }
            entry.last_sent = Some(Instant::now());
            entry.last_numeric = numeric.or(entry.last_numeric);
            entry.pending = None;
            value
        };

        self.dispatch(key, vec![(variable.name().to_string(), decision)]);
    }

    /// Distribue un lot de propriétés à tous les abonnés du service.
    fn dispatch(&self, key: &ServiceKey, properties: Vec<(String, String)>) {
        let body = encode_property_set(&properties);
        let jobs: Vec<DeliveryJob> = {
            let mut subs = self.subscriptions.lock().unwrap();
            subs.values_mut()
                .filter(|e| &e.key == key)
                .map(|entry| DeliveryJob {
                    sid: entry.subscription.sid.clone(),
                    callbacks: entry.subscription.callbacks.clone(),
                    seq: entry.subscription.sequence.next(),
                    body: body.clone(),
                })
                .collect()
        };
        for job in jobs {
            self.enqueue(job);
        }
    }

    /// Arrête le worker de livraison : ferme la file, qui est vidée
    /// avant que le thread ne se termine.
    pub fn shutdown(&self) {
        drop(self.delivery_tx.lock().unwrap().take());
        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl StatePublisher for EventServer {
    fn property_changed(&self, key: &ServiceKey, variable: &StateVariable, value: String) {
        self.moderated_publish(key, variable, value);
    }
}

/// Essaie chaque callback dans l'ordre ; vrai dès qu'une livraison passe.
fn deliver(client: &dyn StreamClient, job: &DeliveryJob) -> bool {
    for callback in &job.callbacks {
        let request = StreamRequestMessage::new(StreamMethod::Notify, callback.as_str())
            .with_header("CONTENT-TYPE", "text/xml; charset=\"utf-8\"")
            .with_header("NT", NT_UPNP_EVENT)
            .with_header("NTS", NTS_PROPCHANGE)
            .with_header("SID", job.sid.to_string())
            .with_header("SEQ", job.seq.to_string())
            .with_body(job.body.clone().into_bytes());

        match client.request(&request) {
            Ok(response) if response.is_success() => {
                debug!("✅ NOTIFY SEQ {} delivered to {}", job.seq, callback);
                return true;
            }
            Ok(response) => {
                warn!("NOTIFY to {} answered {}", callback, response.status);
            }
            Err(e) => {
                warn!("NOTIFY to {} failed: {}", callback, e);
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::{ServiceBuilder, StateVariableSpec};
    use crate::gena::decode_property_set;
    use crate::model::{ServiceId, ServiceType, Udn};
    use crate::service::{ActionError, ServiceHandler};
    use crate::transport::TransportError;
    use crate::types::{StateValue, StateVarType};

    #[derive(Default)]
    struct CaptureClient {
        notifies: Mutex<Vec<(String, u32, String)>>,
        fail: std::sync::atomic::AtomicBool,
    }

    impl StreamClient for CaptureClient {
        fn request(
            &self,
            request: &StreamRequestMessage,
        ) -> Result<StreamResponseMessage, TransportError> {
            if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(TransportError::Timeout);
            }
            let sid = request.headers.get("SID").unwrap_or_default().to_string();
            let seq: u32 = request.headers.get("SEQ").unwrap().parse().unwrap();
            let body = String::from_utf8(request.body.clone()).unwrap();
            self.notifies.lock().unwrap().push((sid, seq, body));
            Ok(StreamResponseMessage::new(200))
        }
    }

    struct Counter {
        value: i32,
    }

    impl ServiceHandler for Counter {
        fn invoke(
            &mut self,
            _action: &crate::model::Action,
            _inputs: &[(String, StateValue)],
        ) -> Result<Vec<(String, StateValue)>, ActionError> {
            Ok(vec![])
        }
        fn read_state_variable(&self, name: &str) -> Option<StateValue> {
            (name == "Count").then_some(StateValue::I4(self.value))
        }
    }

    fn counting_service(max_rate_ms: Option<u64>, min_delta: Option<i64>) -> Arc<ServiceManager> {
        let mut spec = StateVariableSpec::new("Count", StateVarType::I4).send_events(true);
        if let Some(rate) = max_rate_ms {
            spec = spec.event_maximum_rate_ms(rate);
        }
        if let Some(delta) = min_delta {
            spec = spec.event_minimum_delta(delta);
        }
        let service = Arc::new(
            ServiceBuilder::new(
                ServiceType::standard("Counting", 1),
                ServiceId::standard("Counting"),
            )
            .state_variable(spec)
            .build()
            .unwrap(),
        );
        let key: ServiceKey = (
            "uuid:local".parse::<Udn>().unwrap(),
            ServiceId::standard("Counting"),
        );
        Arc::new(ServiceManager::new(service, key, Box::new(Counter { value: 0 })).unwrap())
    }

    fn wait_until(deadline_ms: u64, mut probe: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_millis(deadline_ms);
        while Instant::now() < deadline {
            if probe() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn callbacks() -> Vec<Url> {
        vec![Url::parse("http://127.0.0.1:9/cb").unwrap()]
    }

    #[test]
    fn test_initial_event_has_seq_zero_and_current_values() {
        let client = Arc::new(CaptureClient::default());
        let server = EventServer::new(&UpnpConfig::default(), client.clone());
        let manager = counting_service(None, None);

        let (sid, granted) = server.subscribe(
            manager.key().clone(),
            callbacks(),
            Some(Timeout::Seconds(300)),
            &manager,
        );
        assert_eq!(granted, 300);

        assert!(wait_until(2000, || !client.notifies.lock().unwrap().is_empty()));
        let notifies = client.notifies.lock().unwrap();
        let (got_sid, seq, body) = &notifies[0];
        assert_eq!(got_sid, sid.as_str());
        assert_eq!(*seq, 0);
        let props = decode_property_set(body.as_bytes()).unwrap();
        assert_eq!(props, vec![("Count".to_string(), "0".to_string())]);
    }

    #[test]
    fn test_seq_is_monotonic_per_subscription() {
        let client = Arc::new(CaptureClient::default());
        let server = EventServer::new(&UpnpConfig::default(), client.clone());
        let manager = counting_service(None, None);

        let (_sid, _) = server.subscribe(manager.key().clone(), callbacks(), None, &manager);
        for v in 1..=3 {
            server.property_changed(
                manager.key(),
                manager.service().state_variable("Count").unwrap(),
                v.to_string(),
            );
        }

        assert!(wait_until(2000, || client.notifies.lock().unwrap().len() == 4));
        let notifies = client.notifies.lock().unwrap();
        let seqs: Vec<u32> = notifies.iter().map(|(_, seq, _)| *seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_renew_unknown_sid_is_rejected() {
        let client = Arc::new(CaptureClient::default());
        let server = EventServer::new(&UpnpConfig::default(), client);
        let sid = Sid::random();
        assert!(matches!(
            server.renew(&sid, None),
            Err(GenaServerError::UnknownSid)
        ));
    }

    #[test]
    fn test_lease_expiry_sweep_removes_subscription() {
        let client = Arc::new(CaptureClient::default());
        let config = UpnpConfig {
            min_lease_secs: 1,
            ..Default::default()
        };
        let server = EventServer::new(&config, client);
        let manager = counting_service(None, None);

        // Second-1, borné par minLeaseSec = 1.
        let (sid, granted) = server.subscribe(
            manager.key().clone(),
            callbacks(),
            Some(Timeout::Seconds(1)),
            &manager,
        );
        assert_eq!(granted, 1);
        assert!(server.has_subscription(&sid));

        std::thread::sleep(Duration::from_millis(1100));
        server.remove_expired();
        assert!(!server.has_subscription(&sid));
    }

    #[test]
    fn test_failed_delivery_drops_subscription() {
        let client = Arc::new(CaptureClient::default());
        client.fail.store(true, std::sync::atomic::Ordering::SeqCst);
        let server = EventServer::new(&UpnpConfig::default(), client.clone());
        let manager = counting_service(None, None);

        let (sid, _) = server.subscribe(manager.key().clone(), callbacks(), None, &manager);
        assert!(wait_until(2000, || !server.has_subscription(&sid)));
    }

    #[test]
    fn test_minimum_delta_coalesces_until_crossed() {
        let client = Arc::new(CaptureClient::default());
        let server = EventServer::new(&UpnpConfig::default(), client.clone());
        let manager = counting_service(None, Some(5));
        let variable = manager.service().state_variable("Count").unwrap().clone();

        let (_sid, _) = server.subscribe(manager.key().clone(), callbacks(), None, &manager);
        assert!(wait_until(2000, || client.notifies.lock().unwrap().len() == 1));

        // Premier changement : pas de référence, il part tel quel.
        server.property_changed(manager.key(), &variable, "2".to_string());
        assert!(wait_until(2000, || client.notifies.lock().unwrap().len() == 2));

        // 2 → 4 : sous le delta de 5, coalescé.
        server.property_changed(manager.key(), &variable, "4".to_string());
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(client.notifies.lock().unwrap().len(), 2);

        // 2 → 9 : le delta est franchi, la valeur part.
        server.property_changed(manager.key(), &variable, "9".to_string());
        assert!(wait_until(2000, || client.notifies.lock().unwrap().len() == 3));
        let notifies = client.notifies.lock().unwrap();
        assert!(notifies[2].2.contains("9"));
    }

    #[test]
    fn test_subscribe_request_http_semantics() {
        let client = Arc::new(CaptureClient::default());
        let server = EventServer::new(&UpnpConfig::default(), client);
        let manager = counting_service(None, None);
        let key = manager.key().clone();

        // NT manquant → 412.
        let bad = StreamRequestMessage::new(StreamMethod::Subscribe, "/event")
            .with_header("CALLBACK", "<http://127.0.0.1:9/cb>");
        assert_eq!(server.handle_request(&bad, &key, &manager).status, 412);

        // Abonnement valide → SID + TIMEOUT accordé.
        let ok = StreamRequestMessage::new(StreamMethod::Subscribe, "/event")
            .with_header("NT", "upnp:event")
            .with_header("CALLBACK", "<http://127.0.0.1:9/cb>")
            .with_header("TIMEOUT", "Second-120");
        let response = server.handle_request(&ok, &key, &manager);
        assert_eq!(response.status, 200);
        let sid = response.headers.get("SID").unwrap().to_string();
        assert_eq!(response.headers.get("TIMEOUT"), Some("Second-120"));

        // Renouvellement avec NT → 400.
        let mixed = StreamRequestMessage::new(StreamMethod::Subscribe, "/event")
            .with_header("SID", sid.clone())
            .with_header("NT", "upnp:event");
        assert_eq!(server.handle_request(&mixed, &key, &manager).status, 400);

        // Renouvellement propre → 200.
        let renew = StreamRequestMessage::new(StreamMethod::Subscribe, "/event")
            .with_header("SID", sid.clone())
            .with_header("TIMEOUT", "Second-300");
        assert_eq!(server.handle_request(&renew, &key, &manager).status, 200);

        // UNSUBSCRIBE → 200 puis 412.
        let unsub = StreamRequestMessage::new(StreamMethod::Unsubscribe, "/event")
            .with_header("SID", sid);
        assert_eq!(server.handle_request(&unsub, &key, &manager).status, 200);
        assert_eq!(server.handle_request(&unsub, &key, &manager).status, 412);
    }
}
