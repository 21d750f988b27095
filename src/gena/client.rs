//! Moteur d'eventing côté control point.
//!
//! Envoie les `SUBSCRIBE`/`UNSUBSCRIBE` vers les devices distants,
//! renouvelle les baux avant expiration, et sert les `NOTIFY` entrants
//! sur l'URL de callback locale : validation de la continuité des
//! numéros de séquence (initial 0, wrap sans 0) et livraison des
//! changements décodés aux listeners.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::UpnpConfig;
use crate::gena::propertyset::decode_property_set;
use crate::gena::subscription::{EventSequence, Sid, Timeout};
use crate::gena::{NTS_PROPCHANGE, NT_UPNP_EVENT};
use crate::model::{ServiceId, Udn};
use crate::transport::{
    StreamClient, StreamMethod, StreamRequestMessage, StreamResponseMessage,
};

/// Erreurs du protocole GENA côté client.
#[derive(Debug, Error)]
pub enum GenaClientError {
    #[error("subscription refused with HTTP {0}")]
    Refused(u16),

    #[error("subscription response carries no SID")]
    MissingSid,

    #[error("unknown SID")]
    UnknownSid,

    #[error(transparent)]
    Transport(#[from] crate::transport::TransportError),
}

/// Abonnement tenu par le control point.
#[derive(Debug, Clone)]
pub struct RemoteSubscription {
    pub sid: Sid,
    pub udn: Udn,
    pub service_id: ServiceId,
    pub event_url: Url,
    pub callback_url: Url,
    pub lease_secs: u32,
    pub expires_at: Instant,
    /// Prochain `SEQ` attendu ; `None` avant l'événement initial.
    pub expected_seq: Option<u32>,
    /// Vrai dès qu'un trou de séquence a été observé. UPnP n'offre pas
    /// de resynchronisation : les événements continuent d'être livrés.
    pub gapped: bool,
}

/// Destinataire des changements d'état décodés.
pub trait PropertyChangeListener: Send + Sync {
    fn properties_changed(
        &self,
        subscription: &RemoteSubscription,
        properties: &[(String, String)],
    );

    /// L'abonnement a disparu (échec de renouvellement ou bail écoulé).
    fn subscription_ended(&self, _subscription: &RemoteSubscription) {}
}

/// Client GENA.
pub struct EventClient {
    client: Arc<dyn StreamClient>,
    requested_lease_secs: u32,
    renewal_slack: Duration,
    subscriptions: Mutex<HashMap<Sid, RemoteSubscription>>,
    listeners: RwLock<Vec<Arc<dyn PropertyChangeListener>>>,
}

impl EventClient {
    pub fn new(config: &UpnpConfig, client: Arc<dyn StreamClient>) -> Self {
        Self {
            client,
            requested_lease_secs: config.max_lease_secs,
            renewal_slack: Duration::from_secs(config.renewal_slack_secs as u64),
            subscriptions: Mutex::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn PropertyChangeListener>) {
        self.listeners.write().unwrap().push(listener);
    }

    /// S'abonne au service distant et mémorise SID + bail.
    pub fn subscribe(
        &self,
        udn: Udn,
        service_id: ServiceId,
        event_url: Url,
        callback_url: Url,
    ) -> Result<Sid, GenaClientError> {
        let request = StreamRequestMessage::new(StreamMethod::Subscribe, event_url.as_str())
            .with_header("CALLBACK", format!("<{callback_url}>"))
            .with_header("NT", NT_UPNP_EVENT)
            .with_header(
                "TIMEOUT",
                Timeout::Seconds(self.requested_lease_secs).to_string(),
            );

        let response = self.client.request(&request)?;
        if !response.is_success() {
            return Err(GenaClientError::Refused(response.status));
        }

        let sid = response
            .headers
            .get("SID")
            .and_then(|s| s.parse::<Sid>().ok())
            .ok_or(GenaClientError::MissingSid)?;
        let lease_secs = response
            .headers
            .get("TIMEOUT")
            .and_then(Timeout::parse)
            .map(|t| t.clamp_seconds(1, u32::MAX))
            .unwrap_or(self.requested_lease_secs);

        info!(
            sid = sid.as_str(),
            service = %service_id,
            lease_secs,
            "subscribed to remote service"
        );

        let subscription = RemoteSubscription {
            sid: sid.clone(),
            udn,
            service_id,
            event_url,
            callback_url,
            lease_secs,
            expires_at: Instant::now() + Duration::from_secs(lease_secs as u64),
            expected_seq: None,
            gapped: false,
        };
        self.subscriptions
            .lock()
            .unwrap()
            .insert(sid.clone(), subscription);
        Ok(sid)
    }

    /// Résilie un abonnement (et l'oublie localement quoi qu'il arrive).
    pub fn unsubscribe(&self, sid: &Sid) -> Result<(), GenaClientError> {
        let subscription = self
            .subscriptions
            .lock()
            .unwrap()
            .remove(sid)
            .ok_or(GenaClientError::UnknownSid)?;

        let request =
            StreamRequestMessage::new(StreamMethod::Unsubscribe, subscription.event_url.as_str())
                .with_header("SID", sid.to_string());
        match self.client.request(&request) {
            Ok(response) if response.is_success() => Ok(()),
            Ok(response) => {
                debug!(sid = sid.as_str(), status = response.status, "UNSUBSCRIBE refused");
                Ok(())
            }
            Err(e) => {
                debug!(sid = sid.as_str(), error = %e, "UNSUBSCRIBE failed");
                Ok(())
            }
        }
    }

    pub fn subscription(&self, sid: &Sid) -> Option<RemoteSubscription> {
        self.subscriptions.lock().unwrap().get(sid).cloned()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().unwrap().len()
    }

    /// Renouvelle les abonnements arrivant à `bail − renewalSlack`.
    ///
    /// Un renouvellement refusé ou en échec retire l'abonnement : les
    /// abonnés doivent tolérer la disparition (contrat UPnP).
    pub fn renew_due(&self) {
        let now = Instant::now();
        let due: Vec<RemoteSubscription> = {
            let subs = self.subscriptions.lock().unwrap();
            subs.values()
                .filter(|s| now + self.renewal_slack >= s.expires_at)
                .cloned()
                .collect()
        };

        for subscription in due {
            let request = StreamRequestMessage::new(
                StreamMethod::Subscribe,
                subscription.event_url.as_str(),
            )
            .with_header("SID", subscription.sid.to_string())
            .with_header(
                "TIMEOUT",
                Timeout::Seconds(self.requested_lease_secs).to_string(),
            );

            let renewed = match self.client.request(&request) {
                Ok(response) if response.is_success() => {
                    let lease_secs = response
                        .headers
                        .get("TIMEOUT")
                        .and_then(Timeout::parse)
                        .map(|t| t.clamp_seconds(1, u32::MAX))
                        .unwrap_or(subscription.lease_secs);
                    let mut subs = self.subscriptions.lock().unwrap();
                    if let Some(live) = subs.get_mut(&subscription.sid) {
                        live.lease_secs = lease_secs;
                        live.expires_at = now + Duration::from_secs(lease_secs as u64);
                    }
                    debug!(sid = subscription.sid.as_str(), lease_secs, "lease renewed");
                    true
                }
                Ok(response) => {
                    warn!(
                        sid = subscription.sid.as_str(),
                        status = response.status,
                        "renewal refused"
                    );
                    false
                }
                Err(e) => {
                    warn!(sid = subscription.sid.as_str(), error = %e, "renewal failed");
                    false
                }
            };

            if !renewed {
                self.drop_subscription(&subscription.sid);
            }
        }
    }

    /// Retire les abonnements dont le bail est écoulé sans renouvellement.
    pub fn remove_expired(&self) {
        let now = Instant::now();
        let expired: Vec<Sid> = {
            let subs = self.subscriptions.lock().unwrap();
            subs.values()
                .filter(|s| s.expires_at <= now)
                .map(|s| s.sid.clone())
                .collect()
        };
        for sid in expired {
            self.drop_subscription(&sid);
        }
    }

    fn drop_subscription(&self, sid: &Sid) {
        let removed = self.subscriptions.lock().unwrap().remove(sid);
        if let Some(subscription) = removed {
            info!(sid = sid.as_str(), "subscription ended");
            let listeners = self.listeners.read().unwrap().clone();
            for listener in listeners {
                listener.subscription_ended(&subscription);
            }
        }
    }

    /// Sert un `NOTIFY` entrant sur l'URL de callback locale.
    pub fn handle_notify(&self, request: &StreamRequestMessage) -> StreamResponseMessage {
        if request.headers.get("NT") != Some(NT_UPNP_EVENT)
            || request.headers.get("NTS") != Some(NTS_PROPCHANGE)
        {
            return StreamResponseMessage::new(400);
        }
        let Some(sid) = request.headers.get("SID").and_then(|s| s.parse::<Sid>().ok()) else {
            return StreamResponseMessage::new(400);
        };
        let Some(seq) = request.headers.get("SEQ").and_then(|s| s.parse::<u32>().ok()) else {
            return StreamResponseMessage::new(400);
        };

        let properties = match decode_property_set(&request.body) {
            Ok(properties) => properties,
            Err(e) => {
                warn!(sid = sid.as_str(), error = %e, "undecodable property set");
                return StreamResponseMessage::new(400);
            }
        };

        let snapshot = {
            let mut subs = self.subscriptions.lock().unwrap();
            let Some(subscription) = subs.get_mut(&sid) else {
                return StreamResponseMessage::new(412);
            };

            // Continuité : initial = 0, ensuite le successeur strict.
            let expected = subscription.expected_seq.unwrap_or(0);
            if seq != expected {
                warn!(
                    sid = sid.as_str(),
                    expected,
                    received = seq,
                    "event sequence gap"
                );
                subscription.gapped = true;
            }
            subscription.expected_seq = Some(EventSequence::successor(seq));
            subscription.clone()
        };

        // Listeners hors verrou.
        let listeners = self.listeners.read().unwrap().clone();
        for listener in listeners {
            listener.properties_changed(&snapshot, &properties);
        }

        StreamResponseMessage::new(200)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gena::propertyset::encode_property_set;
    use crate::transport::TransportError;
    use std::sync::atomic::{AtomicU16, Ordering};

    /// Serveur GENA factice : accorde les abonnements et compte les appels.
    #[derive(Default)]
    struct FakeDevice {
        grant_secs: u32,
        refuse_renewals: bool,
        subscribes: AtomicU16,
        renewals: AtomicU16,
        unsubscribes: AtomicU16,
    }

    impl StreamClient for FakeDevice {
        fn request(
            &self,
            request: &StreamRequestMessage,
        ) -> Result<StreamResponseMessage, TransportError> {
            match request.method {
                StreamMethod::Subscribe if request.headers.get("SID").is_none() => {
                    self.subscribes.fetch_add(1, Ordering::SeqCst);
                    Ok(StreamResponseMessage::new(200)
                        .with_header("SID", Sid::random().to_string())
                        .with_header("TIMEOUT", format!("Second-{}", self.grant_secs)))
                }
                StreamMethod::Subscribe => {
                    self.renewals.fetch_add(1, Ordering::SeqCst);
                    if self.refuse_renewals {
                        Ok(StreamResponseMessage::new(412))
                    } else {
                        Ok(StreamResponseMessage::new(200)
                            .with_header("TIMEOUT", format!("Second-{}", self.grant_secs)))
                    }
                }
                StreamMethod::Unsubscribe => {
                    self.unsubscribes.fetch_add(1, Ordering::SeqCst);
                    Ok(StreamResponseMessage::new(200))
                }
                _ => Ok(StreamResponseMessage::new(405)),
            }
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(bool, Vec<(String, String)>)>>,
        ended: AtomicU16,
    }

    impl PropertyChangeListener for Recorder {
        fn properties_changed(
            &self,
            subscription: &RemoteSubscription,
            properties: &[(String, String)],
        ) {
            self.events
                .lock()
                .unwrap()
                .push((subscription.gapped, properties.to_vec()));
        }
        fn subscription_ended(&self, _s: &RemoteSubscription) {
            self.ended.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn client_with(device: Arc<FakeDevice>) -> EventClient {
        EventClient::new(&UpnpConfig::default(), device)
    }

    fn subscribe(client: &EventClient) -> Sid {
        client
            .subscribe(
                "uuid:remote".parse().unwrap(),
                ServiceId::standard("AVTransport"),
                Url::parse("http://10.0.0.9:8080/event").unwrap(),
                Url::parse("http://10.0.0.2:9090/cb").unwrap(),
            )
            .unwrap()
    }

    fn notify(sid: &Sid, seq: u32, props: &[(String, String)]) -> StreamRequestMessage {
        StreamRequestMessage::new(StreamMethod::Notify, "/cb")
            .with_header("NT", "upnp:event")
            .with_header("NTS", "upnp:propchange")
            .with_header("SID", sid.to_string())
            .with_header("SEQ", seq.to_string())
            .with_body(encode_property_set(props).into_bytes())
    }

    #[test]
    fn test_subscribe_stores_sid_and_lease() {
        let device = Arc::new(FakeDevice {
            grant_secs: 300,
            ..Default::default()
        });
        let client = client_with(device.clone());
        let sid = subscribe(&client);

        let sub = client.subscription(&sid).unwrap();
        assert_eq!(sub.lease_secs, 300);
        assert_eq!(sub.expected_seq, None);
        assert_eq!(device.subscribes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_notify_sequence_continuity() {
        let device = Arc::new(FakeDevice {
            grant_secs: 300,
            ..Default::default()
        });
        let client = client_with(device);
        let recorder = Arc::new(Recorder::default());
        client.add_listener(recorder.clone());
        let sid = subscribe(&client);

        let props = vec![("TransportState".to_string(), "PLAYING".to_string())];
        assert_eq!(client.handle_notify(&notify(&sid, 0, &props)).status, 200);
        assert_eq!(client.handle_notify(&notify(&sid, 1, &props)).status, 200);

        // Saut de 2 → 4 : marqué, mais livré quand même.
        assert_eq!(client.handle_notify(&notify(&sid, 4, &props)).status, 200);

        let events = recorder.events.lock().unwrap();
        assert_eq!(events.len(), 3);
        assert!(!events[0].0);
        assert!(!events[1].0);
        assert!(events[2].0);
        assert_eq!(events[0].1, props);
    }

    #[test]
    fn test_notify_unknown_sid_is_412() {
        let device = Arc::new(FakeDevice {
            grant_secs: 300,
            ..Default::default()
        });
        let client = client_with(device);
        let sid = Sid::random();
        let response = client.handle_notify(&notify(&sid, 0, &[]));
        assert_eq!(response.status, 412);
    }

    #[test]
    fn test_notify_requires_gena_headers() {
        let device = Arc::new(FakeDevice {
            grant_secs: 300,
            ..Default::default()
        });
        let client = client_with(device);
        let sid = subscribe(&client);
        let bad = StreamRequestMessage::new(StreamMethod::Notify, "/cb")
            .with_header("SID", sid.to_string())
            .with_header("SEQ", "0");
        assert_eq!(client.handle_notify(&bad).status, 400);
    }

    #[test]
    fn test_failed_renewal_drops_subscription() {
        let device = Arc::new(FakeDevice {
            grant_secs: 10,
            refuse_renewals: true,
            ..Default::default()
        });
        let client = client_with(device.clone());
        let recorder = Arc::new(Recorder::default());
        client.add_listener(recorder.clone());
        let sid = subscribe(&client);

        // Bail de 10 s, marge de 30 s : le renouvellement est déjà dû.
        client.renew_due();
        assert_eq!(device.renewals.load(Ordering::SeqCst), 1);
        assert!(client.subscription(&sid).is_none());
        assert_eq!(recorder.ended.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_successful_renewal_extends_lease() {
        let device = Arc::new(FakeDevice {
            grant_secs: 10,
            ..Default::default()
        });
        let client = client_with(device.clone());
        let sid = subscribe(&client);
        let before = client.subscription(&sid).unwrap().expires_at;

        client.renew_due();
        assert_eq!(device.renewals.load(Ordering::SeqCst), 1);
        let after = client.subscription(&sid).unwrap().expires_at;
        assert!(after >= before);
    }

    #[test]
    fn test_unsubscribe_forgets_locally_even_on_error() {
        let device = Arc::new(FakeDevice {
            grant_secs: 300,
            ..Default::default()
        });
        let client = client_with(device.clone());
        let sid = subscribe(&client);
        client.unsubscribe(&sid).unwrap();
        assert_eq!(device.unsubscribes.load(Ordering::SeqCst), 1);
        assert!(client.subscription(&sid).is_none());
        assert!(matches!(
            client.unsubscribe(&sid),
            Err(GenaClientError::UnknownSid)
        ));
    }
}
