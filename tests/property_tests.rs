use std::collections::BTreeSet;
use std::sync::Arc;

use penumbra::{
    default_metrics, ArrayMembershipTracker, IdentifierRef, IdentifierRegistry, RelationshipData,
    RelationshipDefinition, RelationshipPayload, ResourceIdentity, ResourceRef, StaticSchema,
    Store, StoreOptions,
};
use proptest::prelude::*;

const PEOPLE: u8 = 4;
const HOBBIES: u8 = 6;

#[derive(Debug, Clone)]
enum Push {
    HobbyUser { hobby: u8, person: Option<u8> },
    PersonHobbies { person: u8, hobbies: BTreeSet<u8> },
    Read { person: u8 },
}

fn arb_push() -> impl Strategy<Value = Push> {
    prop_oneof![
        (0..HOBBIES, prop::option::of(0..PEOPLE))
            .prop_map(|(hobby, person)| Push::HobbyUser { hobby, person }),
        (0..PEOPLE, prop::collection::btree_set(0..HOBBIES, 0..=3))
            .prop_map(|(person, hobbies)| Push::PersonHobbies { person, hobbies }),
        (0..PEOPLE).prop_map(|person| Push::Read { person }),
    ]
}

fn person(n: u8) -> ResourceRef {
    ResourceRef::new("person", n.to_string())
}

fn hobby(n: u8) -> ResourceRef {
    ResourceRef::new("hobby", n.to_string())
}

fn store() -> Store {
    let schema = StaticSchema::new()
        .with(RelationshipDefinition::has_many("person", "hobbies", "hobby").inverse("user"))
        .with(RelationshipDefinition::belongs_to("hobby", "user", "person").inverse("hobbies"));
    Store::new(Arc::new(schema), StoreOptions::new())
}

#[derive(Debug, Clone)]
enum Toggle {
    Load(u8),
    Unload(u8),
    Sync,
}

fn arb_toggle() -> impl Strategy<Value = Toggle> {
    prop_oneof![
        (0u8..8).prop_map(Toggle::Load),
        (0u8..8).prop_map(Toggle::Unload),
        Just(Toggle::Sync),
    ]
}

proptest! {
    #[test]
    fn prop_inverse_views_agree(pushes in prop::collection::vec(arb_push(), 1..40)) {
        let mut store = store();
        for push in pushes {
            match push {
                Push::HobbyUser { hobby: h, person: p } => {
                    let payload = match p {
                        Some(p) => RelationshipPayload::one(person(p)),
                        None => RelationshipPayload::null(),
                    };
                    store.push("hobby", &h.to_string(), "user", payload).unwrap();
                }
                Push::PersonHobbies { person: p, hobbies } => {
                    let payload = RelationshipPayload::many(hobbies.into_iter().map(hobby));
                    store.push("person", &p.to_string(), "hobbies", payload).unwrap();
                }
                Push::Read { person: p } => {
                    store.get("person", &p.to_string(), "hobbies").unwrap();
                }
            }
        }

        for h in 0..HOBBIES {
            let user = store.get("hobby", &h.to_string(), "user").unwrap();
            if let Some(RelationshipData::One(owner)) = &user.data {
                let hobbies = store.get("person", &owner.id, "hobbies").unwrap();
                prop_assert!(hobbies.members().contains(&hobby(h)));
            }
        }
        for p in 0..PEOPLE {
            let hobbies = store.get("person", &p.to_string(), "hobbies").unwrap();
            let members = hobbies.members().to_vec();
            let unique: BTreeSet<_> = members.iter().cloned().collect();
            prop_assert_eq!(unique.len(), members.len());
            for member in members {
                let user = store.get("hobby", &member.id, "user").unwrap();
                prop_assert_eq!(user.data, Some(RelationshipData::One(person(p))));
            }
        }
    }

    #[test]
    fn prop_live_array_matches_loaded_set(toggles in prop::collection::vec(arb_toggle(), 1..80)) {
        let mut registry = IdentifierRegistry::new("@lid:");
        let identities: Vec<ResourceIdentity> = (0..8)
            .map(|n| registry.get_or_create(&IdentifierRef::new("person", n.to_string())))
            .collect();
        let mut tracker = ArrayMembershipTracker::new(3, default_metrics());
        let live = tracker.live_array_for("person");
        let mut loaded = BTreeSet::new();

        for toggle in toggles {
            match toggle {
                Toggle::Load(n) => {
                    if loaded.insert(n) {
                        tracker.identifier_added(&identities[n as usize]);
                    }
                }
                Toggle::Unload(n) => {
                    if loaded.remove(&n) {
                        tracker.identifier_removed(&identities[n as usize]);
                    }
                }
                Toggle::Sync => {
                    tracker.sync(live).unwrap();
                }
            }
        }

        let members = tracker.members(live).unwrap().to_vec();
        let expected: Vec<_> = loaded.iter().map(|n| identities[*n as usize].lid.clone()).collect();
        let mut actual = members.clone();
        actual.sort();
        let mut expected_sorted = expected.clone();
        expected_sorted.sort();
        prop_assert_eq!(actual, expected_sorted);
        prop_assert!(tracker.array(live).unwrap().pending().is_empty());
        for lid in &members {
            prop_assert_eq!(tracker.arrays_containing(lid), vec![live]);
        }
    }
}
