use ic_stable_structures::{storable::Bound, Storable};
use serde::{de::DeserializeOwned, Serialize};
use std::borrow::Cow;

/// Wraps any serde type so it can live in stable memory, CBOR-encoded.
///
/// Encoding failures trap: stable memory holding bytes we cannot decode means
/// the canister state is already corrupt, and trapping rolls the call back.
#[derive(Clone, Debug, Ord, PartialOrd, Eq, PartialEq)]
pub struct Cbor<T>(pub T)
where
    T: Serialize + DeserializeOwned;

impl<T> Storable for Cbor<T>
where
    T: Serialize + DeserializeOwned,
{
    fn to_bytes(&self) -> Cow<[u8]> {
        let mut writer = vec![];
        ciborium::ser::into_writer(&self.0, &mut writer)
            .expect("Failed to serialize value to CBOR for stable storage");
        Cow::Owned(writer)
    }

    fn from_bytes(bytes: Cow<[u8]>) -> Self {
        let value: T = ciborium::de::from_reader(bytes.as_ref())
            .expect("Failed to deserialize value from CBOR from stable storage");
        Cbor(value)
    }

    const BOUND: Bound = Bound::Unbounded;
}

pub type StorableString = Cbor<String>;

/// Index key ordering vault titles under their owner.
pub type OwnerTitleKey = Cbor<(u64, String)>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_title_keys_sort_by_owner_first() {
        let a: OwnerTitleKey = Cbor((1, "zebra".to_string()));
        let b: OwnerTitleKey = Cbor((2, "apple".to_string()));
        assert!(a < b);
        let decoded = OwnerTitleKey::from_bytes(a.to_bytes());
        assert_eq!(decoded, a);
    }
}
