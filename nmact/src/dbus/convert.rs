//! Conversions between zvariant values and the crate's value model.
//!
//! Only the shapes NetworkManager actually uses are decoded; anything else
//! is skipped with a debug line and never reaches the cache.

use log::debug;
use std::collections::HashMap;
use zvariant::{Array, OwnedObjectPath, OwnedValue, Value};

use crate::api::models::{ConnectionSettings, Error, ObjectPath, PropValue, PropertyBag, Result};

pub(crate) fn to_owned_path(path: &ObjectPath) -> Result<OwnedObjectPath> {
    OwnedObjectPath::try_from(path.as_str()).map_err(|_| Error::InvalidObjectPath(path.to_string()))
}

pub(crate) fn from_owned_path(path: &OwnedObjectPath) -> Result<ObjectPath> {
    ObjectPath::new(path.as_str())
}

pub(crate) fn to_value(value: &PropValue) -> Result<Value<'static>> {
    Ok(match value {
        PropValue::Bool(b) => Value::from(*b),
        PropValue::U32(n) => Value::from(*n),
        PropValue::I32(n) => Value::from(*n),
        PropValue::U64(n) => Value::from(*n),
        PropValue::I64(n) => Value::from(*n),
        PropValue::Str(s) => Value::from(s.clone()),
        PropValue::Path(p) => Value::from(to_owned_path(p)?),
        PropValue::Bytes(b) => Value::from(b.clone()),
        PropValue::U32List(l) => Value::from(l.clone()),
        PropValue::StrList(l) => Value::from(l.clone()),
        PropValue::PathList(l) => {
            let paths = l.iter().map(to_owned_path).collect::<Result<Vec<_>>>()?;
            Value::from(paths)
        }
    })
}

/// Decodes a value, or `None` for shapes the model has no variant for.
pub(crate) fn from_value(value: &Value<'_>) -> Option<PropValue> {
    Some(match value {
        Value::Bool(b) => PropValue::Bool(*b),
        Value::U8(n) => PropValue::U32(u32::from(*n)),
        Value::U16(n) => PropValue::U32(u32::from(*n)),
        Value::U32(n) => PropValue::U32(*n),
        Value::I16(n) => PropValue::I32(i32::from(*n)),
        Value::I32(n) => PropValue::I32(*n),
        Value::U64(n) => PropValue::U64(*n),
        Value::I64(n) => PropValue::I64(*n),
        Value::Str(s) => PropValue::Str(s.as_str().to_owned()),
        Value::ObjectPath(p) => PropValue::Path(ObjectPath::new(p.as_str()).ok()?),
        Value::Value(inner) => return from_value(inner),
        Value::Array(a) => return from_array(a),
        _ => return None,
    })
}

fn from_array(array: &Array<'_>) -> Option<PropValue> {
    match array.element_signature().to_string().as_str() {
        "y" => array
            .iter()
            .map(|v| match v {
                Value::U8(b) => Some(*b),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()
            .map(PropValue::Bytes),
        "u" => array
            .iter()
            .map(|v| match v {
                Value::U32(n) => Some(*n),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()
            .map(PropValue::U32List),
        "s" => array
            .iter()
            .map(|v| match v {
                Value::Str(s) => Some(s.as_str().to_owned()),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()
            .map(PropValue::StrList),
        "o" => array
            .iter()
            .map(|v| match v {
                Value::ObjectPath(p) => ObjectPath::new(p.as_str()).ok(),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()
            .map(PropValue::PathList),
        _ => None,
    }
}

/// Decodes an `a{sv}` dictionary, dropping entries it cannot represent.
pub(crate) fn bag_from(dict: &HashMap<String, OwnedValue>) -> PropertyBag {
    let mut bag = PropertyBag::new();
    for (name, value) in dict {
        match from_value(value) {
            Some(v) => {
                bag.insert(name.clone(), v);
            }
            None => debug!("Skipping property {name} with unsupported type"),
        }
    }
    bag
}

pub(crate) fn bag_to(bag: &PropertyBag) -> Result<HashMap<&str, Value<'static>>> {
    bag.iter()
        .map(|(k, v)| Ok((k.as_str(), to_value(v)?)))
        .collect()
}

pub(crate) fn settings_from(raw: &HashMap<String, HashMap<String, OwnedValue>>) -> ConnectionSettings {
    raw.iter()
        .map(|(section, dict)| (section.clone(), bag_from(dict)))
        .collect()
}

pub(crate) fn settings_to(settings: &ConnectionSettings) -> Result<HashMap<&str, HashMap<&str, Value<'static>>>> {
    settings
        .iter()
        .map(|(section, bag)| Ok((section.as_str(), bag_to(bag)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_survive_both_ways() {
        for v in [
            PropValue::Bool(true),
            PropValue::U32(7),
            PropValue::I32(-3),
            PropValue::Str("eth0".into()),
            PropValue::Path(ObjectPath::new("/org/freedesktop/NetworkManager/Devices/1").unwrap()),
        ] {
            let encoded = to_value(&v).unwrap();
            assert_eq!(from_value(&encoded), Some(v));
        }
    }

    #[test]
    fn arrays_decode_by_element_type() {
        let bytes = Value::from(vec![1u8, 2, 3]);
        assert_eq!(from_value(&bytes), Some(PropValue::Bytes(vec![1, 2, 3])));

        let dns = Value::from(vec![0x0808_0808u32, 0x0404_0404]);
        assert_eq!(
            from_value(&dns),
            Some(PropValue::U32List(vec![0x0808_0808, 0x0404_0404]))
        );

        let perms = Value::from(vec!["user:alice:".to_owned()]);
        assert_eq!(
            from_value(&perms),
            Some(PropValue::StrList(vec!["user:alice:".into()]))
        );
    }

    #[test]
    fn nested_variant_is_unwrapped() {
        let inner = Value::Value(Box::new(Value::from(42u32)));
        assert_eq!(from_value(&inner), Some(PropValue::U32(42)));
    }

    #[test]
    fn unsupported_shapes_are_skipped() {
        assert_eq!(from_value(&Value::from(1.5f64)), None);
    }
}
