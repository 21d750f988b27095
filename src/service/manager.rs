//! Gestionnaire de service : verrou, actions, état initial, LastChange.

use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, warn};

use crate::binder::LocalServiceBindingError;
use crate::gena::LastChange;
use crate::model::{Action, Service, StateVariable};
use crate::service::ServiceKey;
use crate::soap::ErrorCode;
use crate::types::StateValue;

/// Échec applicatif d'une action, encodé en fault SOAP.
#[derive(Debug, Clone)]
pub struct ActionError {
    pub code: ErrorCode,
    pub description: String,
}

impl ActionError {
    pub fn new(code: ErrorCode) -> Self {
        Self {
            description: code.default_description().to_string(),
            code,
        }
    }

    pub fn with_description(code: ErrorCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }

    /// Erreur vendeur (codes 600–899).
    pub fn vendor(code: u16, description: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Vendor(code),
            description: description.into(),
        }
    }
}

impl std::fmt::Display for ActionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code.code(), self.description)
    }
}

impl std::error::Error for ActionError {}

/// Implémentation hôte d'un service local.
///
/// Les méthodes LastChange forment une capacité optionnelle : un service
/// ordinaire garde les implémentations par défaut, un service
/// AVTransport/RenderingControl fournit son accumulateur, ses instances
/// logiques et son instantané d'état par instance.
pub trait ServiceHandler: Send {
    /// Exécute une action. Appelée sous le verrou du gestionnaire.
    fn invoke(
        &mut self,
        action: &Action,
        inputs: &[(String, StateValue)],
    ) -> Result<Vec<(String, StateValue)>, ActionError>;

    /// Valeur courante d'une variable événementielle (événement initial).
    fn read_state_variable(&self, name: &str) -> Option<StateValue>;

    /// Accumulateur LastChange du service, s'il en utilise un.
    fn last_change(&self) -> Option<&LastChange> {
        None
    }

    /// Instances logiques courantes ; vide = instance 0 seule.
    fn current_instance_ids(&self) -> Vec<u32> {
        Vec::new()
    }

    /// Verse l'état courant d'une instance dans un accumulateur.
    fn append_current_state(&self, _accumulator: &LastChange, _instance_id: u32) {}
}

/// Éditeur des changements d'état vers le moteur d'eventing.
pub trait StatePublisher: Send + Sync {
    fn property_changed(&self, key: &ServiceKey, variable: &StateVariable, value: String);
}

/// Gestionnaire d'un service local.
///
/// Ordre de verrouillage : le verrou du gestionnaire s'acquiert toujours
/// avant le moniteur LastChange. `fire_last_change` et toute écriture de
/// variable suivent cet ordre, ce qui interdit l'interblocage entre les
/// deux.
pub struct ServiceManager {
    service: Arc<Service>,
    key: ServiceKey,
    handler: Mutex<Box<dyn ServiceHandler>>,
    publisher: RwLock<Option<Arc<dyn StatePublisher>>>,
}

impl ServiceManager {
    /// Construit le gestionnaire et vérifie la règle de l'accesseur :
    /// chaque variable événementielle doit être lisible pour l'événement
    /// initial.
    pub fn new(
        service: Arc<Service>,
        key: ServiceKey,
        handler: Box<dyn ServiceHandler>,
    ) -> Result<Self, LocalServiceBindingError> {
        if service.uses_last_change() {
            if handler.last_change().is_none() {
                return Err(LocalServiceBindingError::MissingAccessor {
                    variable: "LastChange".to_string(),
                });
            }
        } else {
            for variable in service.evented_variables() {
                if handler.read_state_variable(variable.name()).is_none() {
                    return Err(LocalServiceBindingError::MissingAccessor {
                        variable: variable.name().to_string(),
                    });
                }
            }
        }
        Ok(Self {
            service,
            key,
            handler: Mutex::new(handler),
            publisher: RwLock::new(None),
        })
    }

    pub fn service(&self) -> &Arc<Service> {
        &self.service
    }

    pub fn key(&self) -> &ServiceKey {
        &self.key
    }

    pub fn set_publisher(&self, publisher: Arc<dyn StatePublisher>) {
        *self.publisher.write().unwrap() = Some(publisher);
    }

    /// Invoque une action sous le verrou du gestionnaire.
    ///
    /// Les invocations d'un même service sont sérialisées ; des services
    /// différents s'exécutent en parallèle.
    pub fn execute(
        &self,
        action: &Action,
        inputs: &[(String, StateValue)],
    ) -> Result<Vec<(String, StateValue)>, ActionError> {
        let mut handler = self.handler.lock().unwrap();
        handler.invoke(action, inputs)
    }

    /// Signale un changement de variable au moteur d'eventing.
    ///
    /// À appeler après la mise à jour de l'état côté hôte ; la valeur est
    /// validée contre les métadonnées puis publiée (modération comprise).
    pub fn notify_state_changed(&self, name: &str, value: StateValue) {
        let Some(variable) = self.service.state_variable(name) else {
            warn!(service = %self.key.1, variable = name, "change on undeclared state variable");
            return;
        };
        if !variable.sends_events() {
            return;
        }
        if let Err(e) = variable.validate(&value) {
            warn!(service = %self.key.1, variable = name, error = %e, "invalid evented value");
            return;
        }
        self.publish(variable, value.format());
    }

    /// Publie le delta LastChange accumulé, en une seule propriété.
    ///
    /// Prend le verrou du gestionnaire *avant* d'entrer dans le moniteur
    /// LastChange (contrat d'ordre des verrous).
    pub fn fire_last_change(&self) {
        let handler = self.handler.lock().unwrap();
        let Some(last_change) = handler.last_change() else {
            return;
        };
        let Some(delta) = last_change.fire() else {
            return;
        };
        drop(handler);

        let Some(variable) = self.service.state_variable("LastChange") else {
            return;
        };
        self.publish(variable, delta);
    }

    /// État initial pour un nouvel abonnement GENA (`SEQ: 0`).
    ///
    /// Service ordinaire : une propriété par variable événementielle.
    /// Service LastChange : un accumulateur *frais* (pas celui de
    /// l'eventing vif, qui notifierait les autres abonnés), rempli via
    /// `append_current_state` pour chaque instance logique, instance 0 à
    /// défaut.
    pub fn read_initial_event_state(&self) -> Vec<(String, String)> {
        let handler = self.handler.lock().unwrap();

        if self.service.uses_last_change() {
            let namespace = handler
                .last_change()
                .map(|lc| lc.namespace().to_string())
                .unwrap_or_else(|| crate::gena::AVT_EVENT_NS.to_string());
            let fresh = LastChange::new(&namespace);

            let mut ids = handler.current_instance_ids();
            if ids.is_empty() {
                ids.push(0);
            }
            for instance_id in ids {
                handler.append_current_state(&fresh, instance_id);
            }

            let document = fresh
                .fire()
                .unwrap_or_else(|| format!(r#"<Event xmlns="{namespace}" />"#));
            return vec![("LastChange".to_string(), document)];
        }

        let mut properties = Vec::new();
        for variable in self.service.evented_variables() {
            match handler.read_state_variable(variable.name()) {
                Some(value) => properties.push((variable.name().to_string(), value.format())),
                None => {
                    // L'accesseur existait au binding ; état transitoire.
                    debug!(variable = variable.name(), "no current value for initial event");
                }
            }
        }
        properties
    }

    fn publish(&self, variable: &StateVariable, value: String) {
        let publisher = self.publisher.read().unwrap().clone();
        match publisher {
            Some(publisher) => publisher.property_changed(&self.key, variable, value),
            None => debug!(
                variable = variable.name(),
                "state change before eventing is wired, dropped"
            ),
        }
    }
}
