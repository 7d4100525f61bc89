use serde::{Deserialize, Serialize};
use std::sync::{Mutex, OnceLock};

/// Type id the capture card registers under in the host card picker.
pub const CARD_TYPE_ID: &str = "hassbeam-connect-card";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CardDescriptor {
    pub type_id: String,
    pub name: String,
    pub description: String,
}

static CARD_REGISTRY: OnceLock<Mutex<Vec<CardDescriptor>>> = OnceLock::new();

fn registry() -> &'static Mutex<Vec<CardDescriptor>> {
    CARD_REGISTRY.get_or_init(|| Mutex::new(Vec::new()))
}

/// Registers a card type with the process-wide picker registry.
///
/// Registration is idempotent per type id: the module may be evaluated more
/// than once (the host loads card resources eagerly), and only the first
/// registration wins. Returns true when the descriptor was inserted.
pub fn register_once(descriptor: CardDescriptor) -> bool {
    let mut cards = registry().lock().unwrap_or_else(|e| e.into_inner());
    if cards.iter().any(|row| row.type_id == descriptor.type_id) {
        return false;
    }
    cards.push(descriptor);
    true
}

pub fn is_registered(type_id: &str) -> bool {
    let cards = registry().lock().unwrap_or_else(|e| e.into_inner());
    cards.iter().any(|row| row.type_id == type_id)
}

pub fn registered_cards() -> Vec<CardDescriptor> {
    registry().lock().unwrap_or_else(|e| e.into_inner()).clone()
}

/// Registers the capture card descriptor. Safe to call from every entry
/// point that may race to load the card.
pub fn register_capture_card() -> bool {
    register_once(CardDescriptor {
        type_id: CARD_TYPE_ID.to_string(),
        name: "HassBeam Connect Card".to_string(),
        description: "Capture IR codes from HassBeam devices".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_registration_keeps_a_single_entry() {
        assert!(register_capture_card() || is_registered(CARD_TYPE_ID));
        register_capture_card();
        register_capture_card();

        let matching = registered_cards()
            .into_iter()
            .filter(|row| row.type_id == CARD_TYPE_ID)
            .count();
        assert_eq!(matching, 1);
    }

    #[test]
    fn distinct_type_ids_coexist() {
        register_capture_card();
        let inserted = register_once(CardDescriptor {
            type_id: "hassbeam-manager-card".to_string(),
            name: "HassBeam Manager".to_string(),
            description: "Browse stored IR codes".to_string(),
        });
        assert!(inserted || is_registered("hassbeam-manager-card"));
        assert!(is_registered(CARD_TYPE_ID));
    }
}
