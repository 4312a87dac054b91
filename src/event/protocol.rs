use serde::Deserialize;

/// Wire protocol description for the inbound stream.
///
/// Field names and type tags belong to the simulation server, so they are
/// configuration rather than constants.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ProtocolConfig {
    /// Discriminator field holding the message type tag
    #[serde(default = "default_type_field")]
    pub type_field: String,

    /// When set, entity fields are read from this nested object instead of
    /// the top-level message
    #[serde(default)]
    pub payload_field: Option<String>,

    #[serde(default)]
    pub tags: TypeTags,

    #[serde(default)]
    pub fields: FieldNames,
}

/// Tag values selecting each update variant
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct TypeTags {
    #[serde(default = "default_unit_update")]
    pub unit_update: String,
    #[serde(default = "default_signal_phase")]
    pub signal_phase: String,
    #[serde(default = "default_incident_start")]
    pub incident_start: String,
    #[serde(default = "default_incident_end")]
    pub incident_end: String,
}

/// Field names inside a message
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct FieldNames {
    #[serde(default = "default_id")]
    pub id: String,
    #[serde(default = "default_position")]
    pub position: String,
    #[serde(default = "default_speed")]
    pub speed: String,
    #[serde(default = "default_class")]
    pub class: String,
    #[serde(default = "default_phase")]
    pub phase: String,
    #[serde(default = "default_waypoints")]
    pub waypoints: String,
    /// Coordinate keys inside an object-form position
    #[serde(default = "default_x")]
    pub x: String,
    #[serde(default = "default_y")]
    pub y: String,
}

fn default_type_field() -> String {
    "type".to_string()
}

fn default_unit_update() -> String {
    "vehicle_update".to_string()
}

fn default_signal_phase() -> String {
    "signal_update".to_string()
}

fn default_incident_start() -> String {
    "emergency_start".to_string()
}

fn default_incident_end() -> String {
    "emergency_end".to_string()
}

fn default_id() -> String {
    "id".to_string()
}

fn default_position() -> String {
    "position".to_string()
}

fn default_speed() -> String {
    "speed".to_string()
}

fn default_class() -> String {
    "class".to_string()
}

fn default_phase() -> String {
    "phase".to_string()
}

fn default_waypoints() -> String {
    "route".to_string()
}

fn default_x() -> String {
    "x".to_string()
}

fn default_y() -> String {
    "y".to_string()
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            type_field: default_type_field(),
            payload_field: None,
            tags: TypeTags::default(),
            fields: FieldNames::default(),
        }
    }
}

impl Default for TypeTags {
    fn default() -> Self {
        Self {
            unit_update: default_unit_update(),
            signal_phase: default_signal_phase(),
            incident_start: default_incident_start(),
            incident_end: default_incident_end(),
        }
    }
}

impl Default for FieldNames {
    fn default() -> Self {
        Self {
            id: default_id(),
            position: default_position(),
            speed: default_speed(),
            class: default_class(),
            phase: default_phase(),
            waypoints: default_waypoints(),
            x: default_x(),
            y: default_y(),
        }
    }
}
