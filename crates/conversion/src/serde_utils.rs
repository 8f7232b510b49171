use serde::ser::SerializeMap;
use serde::Serializer;

/// Write an ordered list of payload pairs as a JSON object, keeping insertion order.
pub fn serialize_fields_as_map<S>(payload: &[(String, String)], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut map = serializer.serialize_map(Some(payload.len()))?;
    for (key, value) in payload {
        map.serialize_entry(key, value)?;
    }
    map.end()
}
