//! Device catalog models.
//!
//! A user's catalog maps each device id to one state sub-record per trait
//! kind it synced with. The trait set is fixed at sync time; later updates
//! may only touch fields of traits already present.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Prefix the assistant platform uses for fully qualified trait names.
const QUALIFIED_TRAIT_PREFIX: &str = "action.devices.traits.";

/// State fields of one trait, e.g. `{"on": true}`.
pub type TraitState = Map<String, Value>;

/// Per-device state with all trait sub-records merged into one object.
pub type FlatStates = BTreeMap<String, Map<String, Value>>;

/// A device capability with its own state sub-record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TraitKind {
    OnOff,
    Brightness,
    StartStop,
}

impl TraitKind {
    /// Parse a trait name, bare (`OnOff`) or qualified
    /// (`action.devices.traits.OnOff`). Unrecognized names yield `None`.
    pub fn parse(name: &str) -> Option<Self> {
        match name.strip_prefix(QUALIFIED_TRAIT_PREFIX).unwrap_or(name) {
            "OnOff" => Some(Self::OnOff),
            "Brightness" => Some(Self::Brightness),
            "StartStop" => Some(Self::StartStop),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OnOff => "OnOff",
            Self::Brightness => "Brightness",
            Self::StartStop => "StartStop",
        }
    }

    /// Zero-valued state a trait starts with after SYNC.
    pub fn initial_state(self) -> TraitState {
        let mut state = Map::new();
        match self {
            Self::OnOff => {
                state.insert("on".into(), Value::Bool(false));
            }
            Self::Brightness => {
                state.insert("brightness".into(), Value::from(0));
            }
            Self::StartStop => {
                state.insert("isRunning".into(), Value::Bool(false));
            }
        }
        state
    }

    /// Check that `field` belongs to this trait and `value` has its type.
    pub fn check_field(self, field: &str, value: &Value) -> Result<(), InvalidUpdate> {
        let ok = match (self, field) {
            (Self::OnOff, "on") => value.is_boolean(),
            (Self::Brightness, "brightness") => value.as_u64().is_some_and(|b| b <= 100),
            (Self::StartStop, "isRunning" | "isPaused") => value.is_boolean(),
            _ => {
                return Err(InvalidUpdate(format!(
                    "unknown field '{field}' for trait {self}"
                )));
            }
        };
        if ok {
            Ok(())
        } else {
            Err(InvalidUpdate(format!(
                "invalid value {value} for {self}.{field}"
            )))
        }
    }
}

impl fmt::Display for TraitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device description from the provisioning source, relayed to the platform
/// unchanged on SYNC. Only `id` and `traits` are interpreted here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionedDevice {
    pub id: String,
    #[serde(default)]
    pub traits: Vec<String>,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

/// Trait sub-records of one device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceTraits(BTreeMap<TraitKind, TraitState>);

impl DeviceTraits {
    /// Zero-valued sub-records for every recognized trait name.
    pub fn from_trait_names<S: AsRef<str>>(names: &[S]) -> Self {
        Self(
            names
                .iter()
                .filter_map(|n| TraitKind::parse(n.as_ref()))
                .map(|kind| (kind, kind.initial_state()))
                .collect(),
        )
    }

    pub fn kinds(&self) -> impl Iterator<Item = TraitKind> + '_ {
        self.0.keys().copied()
    }

    pub fn get(&self, kind: TraitKind) -> Option<&TraitState> {
        self.0.get(&kind)
    }

    /// Merge all sub-records into one state object. Later traits win on
    /// key collision.
    pub fn flattened(&self) -> Map<String, Value> {
        let mut flat = Map::new();
        for state in self.0.values() {
            flat.extend(state.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        flat
    }
}

/// Why a state update could not be applied to a catalog.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpdateRejection {
    #[error("unknown device: {0}")]
    UnknownDevice(String),

    #[error("device {device} has no {kind} trait")]
    MissingTrait { device: String, kind: TraitKind },
}

/// A user's full device catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Catalog(BTreeMap<String, DeviceTraits>);

impl Catalog {
    /// Build a fresh catalog from provisioned devices. Unrecognized trait
    /// kinds are dropped.
    pub fn from_devices(devices: &[ProvisionedDevice]) -> Self {
        Self(
            devices
                .iter()
                .map(|d| (d.id.clone(), DeviceTraits::from_trait_names(&d.traits)))
                .collect(),
        )
    }

    pub fn device(&self, id: &str) -> Option<&DeviceTraits> {
        self.0.get(id)
    }

    pub fn device_ids(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Apply a partial update, all or nothing.
    ///
    /// Every referenced device must exist and already carry every referenced
    /// trait; otherwise the catalog is left untouched. Only the named fields
    /// are written.
    pub fn apply(&mut self, update: &StateUpdate) -> Result<(), UpdateRejection> {
        for (device_id, traits) in &update.0 {
            let device = self
                .0
                .get(device_id)
                .ok_or_else(|| UpdateRejection::UnknownDevice(device_id.clone()))?;
            if let Some(kind) = traits.keys().find(|k| !device.0.contains_key(*k)) {
                return Err(UpdateRejection::MissingTrait {
                    device: device_id.clone(),
                    kind: *kind,
                });
            }
        }

        for (device_id, traits) in &update.0 {
            let Some(device) = self.0.get_mut(device_id) else {
                continue;
            };
            for (kind, fields) in traits {
                if let Some(state) = device.0.get_mut(kind) {
                    state.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
            }
        }
        Ok(())
    }
}

/// A state update that failed field validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct InvalidUpdate(pub String);

/// One `{id, cmd}` element of a device report.
#[derive(Debug, Clone, Deserialize)]
pub struct ReportEntry {
    pub id: String,
    pub cmd: Map<String, Value>,
}

/// Typed partial update keyed by device id, trait kind, and field.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct StateUpdate(BTreeMap<String, BTreeMap<TraitKind, TraitState>>);

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one field, validating it against the trait's schema.
    pub fn set(
        &mut self,
        device_id: &str,
        kind: TraitKind,
        field: &str,
        value: Value,
    ) -> Result<(), InvalidUpdate> {
        kind.check_field(field, &value)?;
        self.0
            .entry(device_id.to_string())
            .or_default()
            .entry(kind)
            .or_default()
            .insert(field.to_string(), value);
        Ok(())
    }

    /// Builder-style [`StateUpdate::set`].
    pub fn with(
        mut self,
        device_id: &str,
        kind: TraitKind,
        field: &str,
        value: Value,
    ) -> Result<Self, InvalidUpdate> {
        self.set(device_id, kind, field, value)?;
        Ok(self)
    }

    /// Parse report entries of the form `{id, cmd: {TraitKind: {field: value}}}`.
    /// Repeated device ids merge, later entries winning per field.
    pub fn from_entries(entries: &[ReportEntry]) -> Result<Self, InvalidUpdate> {
        let mut update = Self::new();
        for entry in entries {
            if entry.id.is_empty() {
                return Err(InvalidUpdate("device id must not be empty".into()));
            }
            // An empty cmd still names the device, so the catalog must hold it.
            update.0.entry(entry.id.clone()).or_default();
            for (name, fields) in &entry.cmd {
                let kind = TraitKind::parse(name)
                    .ok_or_else(|| InvalidUpdate(format!("unknown trait kind '{name}'")))?;
                let fields = fields.as_object().ok_or_else(|| {
                    InvalidUpdate(format!("{kind} state for {} must be an object", entry.id))
                })?;
                for (field, value) in fields {
                    update.set(&entry.id, kind, field, value.clone())?;
                }
            }
        }
        Ok(update)
    }

    pub fn device_ids(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Updated fields per device, trait sub-records merged.
    pub fn flattened(&self) -> FlatStates {
        self.0
            .iter()
            .map(|(id, traits)| {
                let mut flat = Map::new();
                for fields in traits.values() {
                    flat.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                (id.clone(), flat)
            })
            .collect()
    }
}
