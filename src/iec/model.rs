//! Dynamic IED data model: logical devices, nodes, objects and attributes,
//! plus the data sets and control blocks hanging off logical nodes.
//!
//! The model is plain data guarded by an `RwLock`; the write lock doubles as
//! the server's data-model lock. Server instances and their running listener
//! share the same [`SharedModel`] handle, so attribute updates made through
//! the control plane are visible to connected client sessions immediately.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use super::error::IedError;
use super::value::MmsValue;

pub type SharedModel = Arc<RwLock<IedModel>>;

/// Functional constraint of a data attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fc {
    St,
    Mx,
    Sp,
    Sv,
    Cf,
    Dc,
    Sg,
    Se,
    Sr,
    Or,
    Bl,
    Ex,
    Co,
}

impl Fc {
    pub fn as_str(&self) -> &'static str {
        match self {
            Fc::St => "ST",
            Fc::Mx => "MX",
            Fc::Sp => "SP",
            Fc::Sv => "SV",
            Fc::Cf => "CF",
            Fc::Dc => "DC",
            Fc::Sg => "SG",
            Fc::Se => "SE",
            Fc::Sr => "SR",
            Fc::Or => "OR",
            Fc::Bl => "BL",
            Fc::Ex => "EX",
            Fc::Co => "CO",
        }
    }
}

/// Declared type of a data attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DaType {
    Boolean,
    Int8,
    Int16,
    Int32,
    Int64,
    Int8u,
    Int16u,
    Int24u,
    Int32u,
    Float32,
    Float64,
    Enumerated,
    VisString32,
    VisString64,
    VisString129,
    VisString255,
    UnicodeString255,
    OctetString64,
    Quality,
    Timestamp,
    Check,
    Constructed,
}

/// Trigger-option bits shared by report and log control blocks.
pub mod trigger_options {
    pub const DATA_CHANGED: u8 = 1;
    pub const QUALITY_CHANGED: u8 = 2;
    pub const DATA_UPDATE: u8 = 4;
    pub const INTEGRITY: u8 = 8;
    pub const GI: u8 = 16;
}

/// Optional-field bits of a report control block.
pub mod report_options {
    pub const SEQ_NUM: u16 = 1;
    pub const TIME_STAMP: u16 = 2;
    pub const REASON_FOR_INCLUSION: u16 = 4;
    pub const DATA_SET: u16 = 8;
    pub const DATA_REFERENCE: u16 = 16;
    pub const BUFFER_OVERFLOW: u16 = 32;
    pub const ENTRY_ID: u16 = 64;
    pub const CONF_REV: u16 = 128;
}

/// Optional-field bits of a sampled-values control block.
pub mod sv_options {
    pub const REFRESH_TIME: u8 = 1;
    pub const SAMPLE_SYNC: u8 = 2;
    pub const SAMPLE_RATE: u8 = 4;
    pub const DATA_SET: u8 = 8;
    pub const SECURITY: u8 = 16;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmpMod {
    SamplesPerPeriod,
    SamplesPerSecond,
    SecondsPerSample,
}

/// Link-layer address attached to a GOOSE or SV control block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhyComAddress {
    pub vlan_priority: u8,
    pub vlan_id: u16,
    pub app_id: u16,
    pub dst_mac: [u8; 6],
}

#[derive(Debug, Clone)]
pub struct DataSet {
    pub name: String,
    /// FCDA references, in declaration order.
    pub entries: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ReportControlBlock {
    pub name: String,
    pub rpt_id: Option<String>,
    pub data_set: Option<String>,
    pub buffered: bool,
    pub conf_rev: u32,
    pub trigger_ops: u8,
    pub options: u16,
    pub buf_time: u32,
    pub intg_pd: u32,
}

#[derive(Debug, Clone)]
pub struct GseControlBlock {
    pub name: String,
    pub app_id: Option<String>,
    pub data_set: Option<String>,
    pub conf_rev: u32,
    pub fixed_offs: bool,
    pub min_time: i32,
    pub max_time: i32,
    pub address: Option<PhyComAddress>,
}

#[derive(Debug, Clone)]
pub struct SvControlBlock {
    pub name: String,
    pub sv_id: Option<String>,
    pub data_set: Option<String>,
    pub conf_rev: u32,
    pub smp_mod: SmpMod,
    pub smp_rate: u16,
    pub is_unicast: bool,
    pub options: u8,
    pub address: Option<PhyComAddress>,
}

#[derive(Debug, Clone)]
pub struct LogControlBlock {
    pub name: String,
    pub data_set: Option<String>,
    pub log_ref: Option<String>,
    pub trigger_ops: u8,
    pub intg_pd: u32,
    pub log_ena: bool,
    pub with_reason_code: bool,
}

#[derive(Debug, Clone)]
pub struct Log {
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct SettingGroupControlBlock {
    pub act_sg: u8,
    pub num_of_sgs: u8,
}

#[derive(Debug, Clone)]
pub struct DataAttribute {
    pub name: String,
    pub da_type: DaType,
    pub fc: Fc,
    pub children: Vec<DataAttribute>,
    pub value: Option<MmsValue>,
}

impl DataAttribute {
    pub fn new(name: impl Into<String>, da_type: DaType, fc: Fc) -> Self {
        DataAttribute {
            name: name.into(),
            da_type,
            fc,
            children: Vec::new(),
            value: None,
        }
    }

    pub fn child(&self, name: &str) -> Option<&DataAttribute> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Current value, falling back to the type's zero value for leaf types
    /// that have never been written. Composite and opaque types yield `None`.
    pub fn current_value(&self) -> Option<MmsValue> {
        if let Some(v) = &self.value {
            return Some(v.clone());
        }
        match self.da_type {
            DaType::Boolean => Some(MmsValue::Boolean(false)),
            DaType::Int8 | DaType::Int16 | DaType::Int32 | DaType::Int64 | DaType::Enumerated => {
                Some(MmsValue::Integer(0))
            }
            DaType::Int8u | DaType::Int16u | DaType::Int24u | DaType::Int32u => {
                Some(MmsValue::Unsigned(0))
            }
            DaType::Float32 | DaType::Float64 => Some(MmsValue::Float(0.0)),
            DaType::VisString32
            | DaType::VisString64
            | DaType::VisString129
            | DaType::VisString255 => Some(MmsValue::VisibleString(String::new())),
            DaType::UnicodeString255 => Some(MmsValue::MmsString(String::new())),
            _ => None,
        }
    }

    /// Store `incoming`, coerced to the declared attribute type. Used by the
    /// server side of client writes, where a mismatch is a protocol error.
    pub fn update_coerced(&mut self, incoming: &MmsValue) -> Result<(), IedError> {
        let coerced = match self.da_type {
            DaType::Boolean => MmsValue::Boolean(
                incoming.as_bool().ok_or(IedError::TypeInconsistent)?,
            ),
            DaType::Int8 | DaType::Int16 | DaType::Int32 | DaType::Int64 | DaType::Enumerated => {
                MmsValue::Integer(incoming.as_i64().ok_or(IedError::TypeInconsistent)?)
            }
            DaType::Int8u | DaType::Int16u | DaType::Int24u | DaType::Int32u => {
                MmsValue::Unsigned(incoming.as_u32().ok_or(IedError::TypeInconsistent)?)
            }
            DaType::Float32 | DaType::Float64 => {
                MmsValue::Float(incoming.as_f64().ok_or(IedError::TypeInconsistent)?)
            }
            DaType::VisString32
            | DaType::VisString64
            | DaType::VisString129
            | DaType::VisString255 => MmsValue::VisibleString(
                incoming
                    .as_str()
                    .ok_or(IedError::TypeInconsistent)?
                    .to_string(),
            ),
            DaType::UnicodeString255 => MmsValue::MmsString(
                incoming
                    .as_str()
                    .ok_or(IedError::TypeInconsistent)?
                    .to_string(),
            ),
            _ => return Err(IedError::ObjectAccessUnsupported),
        };
        self.value = Some(coerced);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum ModelChild {
    Object(DataObject),
    Attribute(DataAttribute),
}

impl ModelChild {
    pub fn name(&self) -> &str {
        match self {
            ModelChild::Object(o) => &o.name,
            ModelChild::Attribute(a) => &a.name,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DataObject {
    pub name: String,
    pub children: Vec<ModelChild>,
}

impl DataObject {
    pub fn new(name: impl Into<String>) -> Self {
        DataObject {
            name: name.into(),
            children: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LogicalNode {
    pub name: String,
    pub objects: Vec<DataObject>,
    /// Attributes attached directly to the node (entries that declare no
    /// CDC in the model description).
    pub attributes: Vec<DataAttribute>,
    pub data_sets: Vec<DataSet>,
    pub report_controls: Vec<ReportControlBlock>,
    pub gse_controls: Vec<GseControlBlock>,
    pub sv_controls: Vec<SvControlBlock>,
    pub log_controls: Vec<LogControlBlock>,
    pub logs: Vec<Log>,
    pub setting_group_control: Option<SettingGroupControlBlock>,
}

impl LogicalNode {
    pub fn new(name: impl Into<String>) -> Self {
        LogicalNode {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn object(&self, name: &str) -> Option<&DataObject> {
        self.objects.iter().find(|o| o.name == name)
    }

    pub fn attribute(&self, name: &str) -> Option<&DataAttribute> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct LogicalDevice {
    pub name: String,
    pub nodes: Vec<LogicalNode>,
}

impl LogicalDevice {
    pub fn new(name: impl Into<String>) -> Self {
        LogicalDevice {
            name: name.into(),
            nodes: Vec::new(),
        }
    }

    pub fn node(&self, name: &str) -> Option<&LogicalNode> {
        self.nodes.iter().find(|n| n.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct IedModel {
    pub name: String,
    pub devices: Vec<LogicalDevice>,
}

impl IedModel {
    pub fn new(name: impl Into<String>) -> Self {
        IedModel {
            name: name.into(),
            devices: Vec::new(),
        }
    }

    pub fn into_shared(self) -> SharedModel {
        Arc::new(RwLock::new(self))
    }

    /// Accepts both the bare logical-device name and the dynamic-model form
    /// with the IED name prefixed.
    pub fn device(&self, name: &str) -> Option<&LogicalDevice> {
        self.devices.iter().find(|d| {
            d.name == name
                || (name.starts_with(self.name.as_str()) && name[self.name.len()..] == d.name)
        })
    }

    /// Resolve an object reference (`LD/LN.DO[.da]*`) to a data attribute.
    /// Anything that is not an attribute (a device, node, object, or an
    /// unknown path) yields `None`.
    pub fn resolve_attribute(&self, reference: &str) -> Option<&DataAttribute> {
        let steps = Self::reference_steps(reference)?;
        let ld = self.device(steps.device)?;
        let ln = ld.node(steps.node)?;
        let first = *steps.path.first()?;

        let Some(dobj) = ln.object(first) else {
            // Node-level attribute; the rest of the path descends into it.
            let mut attr = ln.attribute(first)?;
            for seg in &steps.path[1..] {
                attr = attr.child(seg)?;
            }
            return Some(attr);
        };

        let mut object = dobj;
        let mut attr: Option<&DataAttribute> = None;
        for seg in &steps.path[1..] {
            match attr {
                Some(a) => attr = Some(a.child(seg)?),
                None => match object.children.iter().find(|c| c.name() == *seg)? {
                    ModelChild::Object(o) => object = o,
                    ModelChild::Attribute(a) => attr = Some(a),
                },
            }
        }
        attr
    }

    pub fn resolve_attribute_mut(&mut self, reference: &str) -> Option<&mut DataAttribute> {
        let steps = Self::reference_steps(reference)?;
        let ied_name = self.name.clone();
        let ld = self.devices.iter_mut().find(|d| {
            d.name == steps.device
                || (steps.device.starts_with(ied_name.as_str())
                    && steps.device[ied_name.len()..] == d.name)
        })?;
        let ln = ld.nodes.iter_mut().find(|n| n.name == steps.node)?;
        let first = *steps.path.first()?;

        if !ln.objects.iter().any(|o| o.name == first) {
            let mut attr = ln.attributes.iter_mut().find(|a| a.name == first)?;
            for seg in &steps.path[1..] {
                attr = attr.children.iter_mut().find(|c| c.name == *seg)?;
            }
            return Some(attr);
        }
        let dobj = ln.objects.iter_mut().find(|o| o.name == first)?;
        Self::resolve_in_object_mut(dobj, &steps.path[1..])
    }

    fn resolve_in_object_mut<'a>(
        object: &'a mut DataObject,
        segs: &[&str],
    ) -> Option<&'a mut DataAttribute> {
        let (seg, rest) = segs.split_first()?;
        match object.children.iter_mut().find(|c| c.name() == *seg)? {
            ModelChild::Object(o) => Self::resolve_in_object_mut(o, rest),
            ModelChild::Attribute(a) => Self::resolve_in_attribute_mut(a, rest),
        }
    }

    fn resolve_in_attribute_mut<'a>(
        attr: &'a mut DataAttribute,
        segs: &[&str],
    ) -> Option<&'a mut DataAttribute> {
        let mut attr = attr;
        for seg in segs {
            attr = attr.children.iter_mut().find(|c| c.name == *seg)?;
        }
        Some(attr)
    }

    fn reference_steps(reference: &str) -> Option<ReferenceSteps<'_>> {
        let (device, rest) = reference.split_once('/')?;
        let mut segments = rest.split('.');
        let node = segments.next()?;
        let path: Vec<&str> = segments.collect();
        if device.is_empty() || node.is_empty() || path.is_empty() {
            return None;
        }
        Some(ReferenceSteps { device, node, path })
    }
}

struct ReferenceSteps<'a> {
    device: &'a str,
    node: &'a str,
    path: Vec<&'a str>,
}
