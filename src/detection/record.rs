use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Fixed-order vector form: `(left, top, right, bottom, confidence, class_name)`.
pub type DetectionTuple = (i32, i32, i32, i32, f64, String);

/// Number of elements in the vector form.
pub const VECTOR_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("'box' must be exactly 4 integers, got {0}")]
    InvalidBox(String),

    #[error("'class_name' must be a non-empty string, got {0}")]
    InvalidClassName(String),

    #[error("'confidence' must be a number in [0, 1], got {0}")]
    InvalidConfidence(String),

    #[error("vector must have 6 elements (left, top, right, bottom, confidence, class_name), got {0}")]
    VectorArity(usize),

    #[error("detection must be a JSON object, got {0}")]
    NotAnObject(String),
}

/// Axis-aligned bounding box in pixel coordinates.
///
/// The canonical order everywhere (JSON arrays, vector form, constructors) is
/// left, top, right, bottom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "[i32; 4]", into = "[i32; 4]")]
pub struct BoundingBox {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl BoundingBox {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        BoundingBox {
            left,
            top,
            right,
            bottom,
        }
    }
}

impl From<[i32; 4]> for BoundingBox {
    fn from([left, top, right, bottom]: [i32; 4]) -> Self {
        BoundingBox::new(left, top, right, bottom)
    }
}

impl From<BoundingBox> for [i32; 4] {
    fn from(bbox: BoundingBox) -> Self {
        [bbox.left, bbox.top, bbox.right, bbox.bottom]
    }
}

/// One detected object.
///
/// Created once per inference result and never mutated. `confidence` is the raw
/// detector score in `[0, 1]`; integer scores from untrusted input are widened,
/// never the other way round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>")]
pub struct Detection {
    #[serde(rename = "box")]
    bbox: BoundingBox,
    class_name: String,
    confidence: f64,
}

impl Detection {
    pub fn new(
        bbox: BoundingBox,
        class_name: impl Into<String>,
        confidence: f64,
    ) -> Result<Self, ValidationError> {
        let class_name = class_name.into();
        if class_name.is_empty() {
            return Err(ValidationError::InvalidClassName("\"\"".to_string()));
        }
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(ValidationError::InvalidConfidence(confidence.to_string()));
        }
        Ok(Detection {
            bbox,
            class_name,
            confidence,
        })
    }

    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Map form, as sent on the wire: `{box, class_name, confidence}`.
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::with_capacity(3);
        map.insert(
            "box".to_string(),
            Value::from(<[i32; 4]>::from(self.bbox).to_vec()),
        );
        map.insert(
            "class_name".to_string(),
            Value::String(self.class_name.clone()),
        );
        map.insert("confidence".to_string(), Value::from(self.confidence));
        map
    }

    pub fn from_map(map: &Map<String, Value>) -> Result<Self, ValidationError> {
        let bbox = parse_box(map.get("box").ok_or(ValidationError::MissingField("box"))?)?;
        let class_name = parse_class_name(
            map.get("class_name")
                .ok_or(ValidationError::MissingField("class_name"))?,
        )?;
        let confidence = parse_confidence(
            map.get("confidence")
                .ok_or(ValidationError::MissingField("confidence"))?,
        )?;
        Detection::new(bbox, class_name, confidence)
    }

    pub fn from_value(value: &Value) -> Result<Self, ValidationError> {
        match value {
            Value::Object(map) => Detection::from_map(map),
            other => Err(ValidationError::NotAnObject(other.to_string())),
        }
    }

    /// Vector form: `[left, top, right, bottom, confidence, class_name]`.
    pub fn to_vector(&self) -> Vec<Value> {
        vec![
            Value::from(self.bbox.left),
            Value::from(self.bbox.top),
            Value::from(self.bbox.right),
            Value::from(self.bbox.bottom),
            Value::from(self.confidence),
            Value::String(self.class_name.clone()),
        ]
    }

    pub fn from_vector(vector: &[Value]) -> Result<Self, ValidationError> {
        if vector.len() != VECTOR_LEN {
            return Err(ValidationError::VectorArity(vector.len()));
        }
        let bbox = BoundingBox::new(
            parse_coordinate(&vector[0])?,
            parse_coordinate(&vector[1])?,
            parse_coordinate(&vector[2])?,
            parse_coordinate(&vector[3])?,
        );
        let confidence = parse_confidence(&vector[4])?;
        let class_name = parse_class_name(&vector[5])?;
        Detection::new(bbox, class_name, confidence)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl TryFrom<Map<String, Value>> for Detection {
    type Error = ValidationError;

    fn try_from(map: Map<String, Value>) -> Result<Self, Self::Error> {
        Detection::from_map(&map)
    }
}

impl TryFrom<DetectionTuple> for Detection {
    type Error = ValidationError;

    fn try_from(
        (left, top, right, bottom, confidence, class_name): DetectionTuple,
    ) -> Result<Self, Self::Error> {
        Detection::new(
            BoundingBox::new(left, top, right, bottom),
            class_name,
            confidence,
        )
    }
}

impl From<Detection> for DetectionTuple {
    fn from(detection: Detection) -> Self {
        let BoundingBox {
            left,
            top,
            right,
            bottom,
        } = detection.bbox;
        (
            left,
            top,
            right,
            bottom,
            detection.confidence,
            detection.class_name,
        )
    }
}

/// Encodes a reply payload: a JSON array of detections in map form.
pub fn encode_reply(detections: &[Detection]) -> serde_json::Result<Bytes> {
    serde_json::to_vec(detections).map(Bytes::from)
}

pub fn decode_reply(payload: &[u8]) -> serde_json::Result<Vec<Detection>> {
    serde_json::from_slice(payload)
}

fn parse_coordinate(value: &Value) -> Result<i32, ValidationError> {
    value
        .as_i64()
        .and_then(|v| i32::try_from(v).ok())
        .ok_or_else(|| ValidationError::InvalidBox(value.to_string()))
}

fn parse_box(value: &Value) -> Result<BoundingBox, ValidationError> {
    let items = match value.as_array() {
        Some(items) if items.len() == 4 => items,
        _ => return Err(ValidationError::InvalidBox(value.to_string())),
    };
    let mut coordinates = [0i32; 4];
    for (slot, item) in coordinates.iter_mut().zip(items) {
        *slot = parse_coordinate(item).map_err(|_| ValidationError::InvalidBox(value.to_string()))?;
    }
    Ok(BoundingBox::from(coordinates))
}

fn parse_class_name(value: &Value) -> Result<String, ValidationError> {
    match value {
        Value::String(name) if !name.is_empty() => Ok(name.clone()),
        other => Err(ValidationError::InvalidClassName(other.to_string())),
    }
}

fn parse_confidence(value: &Value) -> Result<f64, ValidationError> {
    value
        .as_f64()
        .ok_or_else(|| ValidationError::InvalidConfidence(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn person() -> Detection {
        Detection::new(BoundingBox::new(10, 20, 110, 220), "person", 0.93).unwrap()
    }

    #[test]
    fn test_map_round_trip() {
        let detection = person();
        assert_eq!(Detection::from_map(&detection.to_map()).unwrap(), detection);
    }

    #[test]
    fn test_vector_round_trip() {
        let detection = person();
        let vector = detection.to_vector();
        assert_eq!(vector.len(), VECTOR_LEN);
        assert_eq!(Detection::from_vector(&vector).unwrap(), detection);
    }

    #[test]
    fn test_tuple_round_trip() {
        let detection = person();
        let tuple: DetectionTuple = detection.clone().into();
        assert_eq!(tuple, (10, 20, 110, 220, 0.93, "person".to_string()));
        assert_eq!(Detection::try_from(tuple).unwrap(), detection);
    }

    #[test]
    fn test_json_layout() {
        assert_eq!(
            person().to_json().unwrap(),
            r#"{"box":[10,20,110,220],"class_name":"person","confidence":0.93}"#
        );
        assert_eq!(&encode_reply(&[]).unwrap()[..], b"[]");
    }

    #[test]
    fn test_decode_reply() {
        let payload = br#"[{"box":[1,2,3,4],"class_name":"cat","confidence":0.5}]"#;
        let detections = decode_reply(payload).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].bbox(), BoundingBox::new(1, 2, 3, 4));
        assert_eq!(detections[0].class_name(), "cat");
    }

    #[test]
    fn test_integer_confidence_is_widened() {
        let value = json!({"box": [0, 0, 1, 1], "class_name": "dog", "confidence": 1});
        let detection = Detection::from_value(&value).unwrap();
        assert_eq!(detection.confidence(), 1.0);
    }

    #[rstest]
    #[case(0)]
    #[case(5)]
    #[case(7)]
    fn test_vector_arity(#[case] len: usize) {
        let vector: Vec<Value> = (0..len).map(|i| Value::from(i as i64)).collect();
        assert_eq!(
            Detection::from_vector(&vector),
            Err(ValidationError::VectorArity(len))
        );
    }

    #[rstest]
    #[case(json!({"box": [1, 2, 3], "class_name": "a", "confidence": 0.1}))]
    #[case(json!({"box": [1, 2, 3, 4, 5], "class_name": "a", "confidence": 0.1}))]
    #[case(json!({"box": [1.5, 2, 3, 4], "class_name": "a", "confidence": 0.1}))]
    #[case(json!({"box": "1,2,3,4", "class_name": "a", "confidence": 0.1}))]
    #[case(json!({"box": [1, 2, 3, 4294967296i64], "class_name": "a", "confidence": 0.1}))]
    fn test_invalid_box(#[case] value: Value) {
        assert!(matches!(
            Detection::from_value(&value),
            Err(ValidationError::InvalidBox(_))
        ));
    }

    #[rstest]
    #[case(json!({"box": [1, 2, 3, 4], "class_name": 3, "confidence": 0.1}))]
    #[case(json!({"box": [1, 2, 3, 4], "class_name": "", "confidence": 0.1}))]
    fn test_invalid_class_name(#[case] value: Value) {
        assert!(matches!(
            Detection::from_value(&value),
            Err(ValidationError::InvalidClassName(_))
        ));
    }

    #[rstest]
    #[case(json!({"box": [1, 2, 3, 4], "class_name": "a", "confidence": "high"}))]
    #[case(json!({"box": [1, 2, 3, 4], "class_name": "a", "confidence": 1.5}))]
    #[case(json!({"box": [1, 2, 3, 4], "class_name": "a", "confidence": null}))]
    fn test_invalid_confidence(#[case] value: Value) {
        assert!(matches!(
            Detection::from_value(&value),
            Err(ValidationError::InvalidConfidence(_))
        ));
    }

    #[test]
    fn test_missing_field() {
        let value = json!({"box": [1, 2, 3, 4], "confidence": 0.2});
        assert_eq!(
            Detection::from_value(&value),
            Err(ValidationError::MissingField("class_name"))
        );
    }

    #[test]
    fn test_deserialize_rejects_malformed() {
        assert!(serde_json::from_str::<Detection>(r#"{"box":[1,2],"class_name":"a","confidence":0.3}"#).is_err());
        assert!(decode_reply(br#"[{"box":[1,2,3,4],"class_name":"a"}]"#).is_err());
    }
}
