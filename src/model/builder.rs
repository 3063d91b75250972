//! Dynamic model builder: materializes an IED model tree (logical devices,
//! nodes, data objects and attributes, data sets, control blocks and PHY
//! addresses) from the nested MessagePack description carried by
//! `server.load_model`.

use rmpv::Value;
use tracing::debug;

use crate::iec::model::{
    report_options, sv_options, trigger_options, DataAttribute, DataObject, DataSet,
    GseControlBlock, IedModel, Log, LogControlBlock, LogicalDevice, LogicalNode, ModelChild,
    PhyComAddress, ReportControlBlock, SettingGroupControlBlock, SmpMod, SvControlBlock,
};
use crate::iec::{DaType, Fc, MmsValue, SharedModel};
use crate::ipc::protocol::{as_i64, as_str, find_key};

pub struct BuiltModel {
    pub model: SharedModel,
    pub ied_name: String,
}

/// Build a fresh model tree from the `model` payload map.
pub fn build_model(model_obj: &Value) -> BuiltModel {
    let ied_name = find_key(model_obj, "name")
        .map(|v| as_str(v, "IED"))
        .unwrap_or("IED")
        .to_string();

    let mut model = IedModel::new(&ied_name);

    if let Some(devices) = find_key(model_obj, "logical_devices").and_then(Value::as_map) {
        for (ld_key, ld_obj) in devices {
            let Some(ld_name) = ld_key.as_str() else {
                continue;
            };
            let mut device = LogicalDevice::new(ld_name);
            if let Some(nodes) = find_key(ld_obj, "logical_nodes").and_then(Value::as_map) {
                for (ln_key, ln_obj) in nodes {
                    let Some(ln_name) = ln_key.as_str() else {
                        continue;
                    };
                    device.nodes.push(build_logical_node(ln_name, ln_obj));
                }
            }
            model.devices.push(device);
        }
    }

    apply_communication(&mut model, model_obj);

    debug!(
        "built model '{}' with {} logical device(s)",
        ied_name,
        model.devices.len()
    );
    BuiltModel {
        model: model.into_shared(),
        ied_name,
    }
}

fn build_logical_node(name: &str, ln_obj: &Value) -> LogicalNode {
    let mut node = LogicalNode::new(name);

    if let Some(objects) = find_key(ln_obj, "data_objects").and_then(Value::as_map) {
        for (key, obj) in objects {
            let Some(child_name) = key.as_str() else {
                continue;
            };
            // Entries declaring a CDC are data objects; the rest attach as
            // attributes directly under the node.
            if find_key(obj, "cdc").is_some() {
                node.objects.push(build_data_object(child_name, obj));
            } else {
                node.attributes.push(build_attribute(child_name, obj));
            }
        }
    }

    if let Some(sets) = find_key(ln_obj, "data_sets").and_then(Value::as_map) {
        for (key, obj) in sets {
            let Some(default_name) = key.as_str() else {
                continue;
            };
            node.data_sets.push(build_data_set(default_name, obj));
        }
    }

    if let Some(controls) = find_key(ln_obj, "report_controls").and_then(Value::as_map) {
        for (key, obj) in controls {
            let Some(default_name) = key.as_str() else {
                continue;
            };
            node.report_controls
                .push(build_report_control(default_name, obj));
        }
    }

    if let Some(controls) = find_key(ln_obj, "gse_controls").and_then(Value::as_map) {
        for (key, obj) in controls {
            let Some(default_name) = key.as_str() else {
                continue;
            };
            node.gse_controls.push(build_gse_control(default_name, obj));
        }
    }

    if let Some(controls) = find_key(ln_obj, "smv_controls").and_then(Value::as_map) {
        for (key, obj) in controls {
            let Some(default_name) = key.as_str() else {
                continue;
            };
            node.sv_controls.push(build_sv_control(default_name, obj));
        }
    }

    if let Some(controls) = find_key(ln_obj, "log_controls").and_then(Value::as_map) {
        for (key, obj) in controls {
            let Some(default_name) = key.as_str() else {
                continue;
            };
            let control = build_log_control(default_name, obj);
            if let Some(log_name) = &control.log_ref {
                if !node.logs.iter().any(|l| &l.name == log_name) {
                    node.logs.push(Log {
                        name: log_name.clone(),
                    });
                }
            }
            node.log_controls.push(control);
        }
    }

    // Setting-group control only lives on LLN0.
    if name == "LLN0" {
        if let Some(sgcb) = find_key(ln_obj, "setting_group_control") {
            if sgcb.is_map() {
                node.setting_group_control = Some(SettingGroupControlBlock {
                    act_sg: int_field(sgcb, &["act_sg"], 1) as u8,
                    num_of_sgs: int_field(sgcb, &["num_of_sgs"], 1) as u8,
                });
            }
        }
    }

    node
}

fn build_data_object(name: &str, obj: &Value) -> DataObject {
    let mut object = DataObject::new(name);
    if let Some(attributes) = find_key(obj, "attributes").and_then(Value::as_map) {
        for (key, child) in attributes {
            let Some(child_name) = key.as_str() else {
                continue;
            };
            // A child that declares a CDC is a nested data object; anything
            // else is a data attribute.
            if find_key(child, "cdc").is_some() {
                object
                    .children
                    .push(ModelChild::Object(build_data_object(child_name, child)));
            } else {
                object
                    .children
                    .push(ModelChild::Attribute(build_attribute(child_name, child)));
            }
        }
    }
    object
}

fn build_attribute(name: &str, obj: &Value) -> DataAttribute {
    let type_str = find_key(obj, "type").map(|v| as_str(v, "")).unwrap_or("");
    let fc_str = find_key(obj, "fc").map(|v| as_str(v, "ST")).unwrap_or("ST");

    let children = find_key(obj, "attributes").and_then(Value::as_map);
    let da_type = if children.is_some() {
        DaType::Constructed
    } else {
        map_type(type_str)
    };

    let mut attribute = DataAttribute::new(name, da_type, map_fc(fc_str));

    if let Some(children) = children {
        for (key, child) in children {
            if let Some(child_name) = key.as_str() {
                attribute.children.push(build_attribute(child_name, child));
            }
        }
        return attribute;
    }

    if let Some(value_obj) = find_key(obj, "value") {
        if !value_obj.is_nil() {
            attribute.value = value_from_payload(value_obj, da_type);
        }
    }
    attribute
}

fn build_data_set(default_name: &str, obj: &Value) -> DataSet {
    let name = string_field(obj, &["name"]).unwrap_or_else(|| default_name.to_string());
    let mut entries = Vec::new();
    if let Some(fcdas) = find_key(obj, "fcdas").and_then(Value::as_array) {
        for entry in fcdas {
            if let Some(reference) = entry.as_str() {
                if !reference.is_empty() {
                    entries.push(reference.to_string());
                }
            }
        }
    }
    DataSet { name, entries }
}

fn build_report_control(default_name: &str, obj: &Value) -> ReportControlBlock {
    let mut trigger_ops = 0u8;
    if flag(obj, "dataChange") {
        trigger_ops |= trigger_options::DATA_CHANGED;
    }
    if flag(obj, "qualityChange") {
        trigger_ops |= trigger_options::QUALITY_CHANGED;
    }
    if flag(obj, "dataUpdate") {
        trigger_ops |= trigger_options::DATA_UPDATE;
    }
    if flag(obj, "integrityCheck") {
        trigger_ops |= trigger_options::INTEGRITY;
    }
    if flag(obj, "gi") || flag(obj, "generalInterrogation") {
        trigger_ops |= trigger_options::GI;
    }

    let mut options = 0u16;
    if flag(obj, "seqNum") {
        options |= report_options::SEQ_NUM;
    }
    if flag(obj, "timeStamp") {
        options |= report_options::TIME_STAMP;
    }
    if flag(obj, "dataSet") {
        options |= report_options::DATA_SET;
    }
    if flag(obj, "reasonForInclusion") {
        options |= report_options::REASON_FOR_INCLUSION;
    }
    if flag(obj, "configRevision") {
        options |= report_options::CONF_REV;
    }
    if flag(obj, "bufferOverflow") {
        options |= report_options::BUFFER_OVERFLOW;
    }
    if flag(obj, "dataReference") {
        options |= report_options::DATA_REFERENCE;
    }
    if flag(obj, "entryId") {
        options |= report_options::ENTRY_ID;
    }

    ReportControlBlock {
        name: string_field(obj, &["name"]).unwrap_or_else(|| default_name.to_string()),
        rpt_id: string_field(obj, &["rptid"]),
        data_set: string_field(obj, &["dataset"]),
        buffered: flag(obj, "buffered"),
        conf_rev: int_field(obj, &["conf_rev", "confRev"], 1) as u32,
        trigger_ops,
        options,
        buf_time: int_field(obj, &["buf_time"], 0) as u32,
        intg_pd: int_field(obj, &["intg_pd"], 0) as u32,
    }
}

fn build_gse_control(default_name: &str, obj: &Value) -> GseControlBlock {
    GseControlBlock {
        name: string_field(obj, &["name"]).unwrap_or_else(|| default_name.to_string()),
        app_id: string_field(obj, &["gocbname"]),
        data_set: string_field(obj, &["dataset"]),
        conf_rev: int_field(obj, &["conf_rev", "confRev"], 1) as u32,
        fixed_offs: flag(obj, "fixedOffs") || flag(obj, "fixed_offsets"),
        min_time: int_field(obj, &["min_time"], -1) as i32,
        max_time: int_field(obj, &["max_time", "time_allowed_to_live"], -1) as i32,
        address: None,
    }
}

fn build_sv_control(default_name: &str, obj: &Value) -> SvControlBlock {
    let smp_mod = match string_field(obj, &["smpmod"]).as_deref() {
        Some(mode) if mode.eq_ignore_ascii_case("SmpPerSec") => SmpMod::SamplesPerSecond,
        Some(mode) if mode.eq_ignore_ascii_case("SecPerSample") => SmpMod::SecondsPerSample,
        _ => SmpMod::SamplesPerPeriod,
    };

    let mut options = 0u8;
    if flag(obj, "sampleSync") {
        options |= sv_options::SAMPLE_SYNC;
    }
    if flag(obj, "sampleRate") {
        options |= sv_options::SAMPLE_RATE;
    }
    if flag(obj, "security") {
        options |= sv_options::SECURITY;
    }
    if flag(obj, "dataSet") {
        options |= sv_options::DATA_SET;
    }
    if flag(obj, "refreshTime") {
        options |= sv_options::REFRESH_TIME;
    }

    SvControlBlock {
        name: string_field(obj, &["name"]).unwrap_or_else(|| default_name.to_string()),
        sv_id: string_field(obj, &["smvcbname"]),
        data_set: string_field(obj, &["dataset"]),
        conf_rev: int_field(obj, &["conf_rev", "confRev"], 1) as u32,
        smp_mod,
        smp_rate: int_field(obj, &["smprate"], 0) as u16,
        is_unicast: flag(obj, "unicast") || flag(obj, "is_unicast"),
        options,
        address: None,
    }
}

fn build_log_control(default_name: &str, obj: &Value) -> LogControlBlock {
    let mut trigger_ops = 0u8;
    if flag(obj, "dataChange") {
        trigger_ops |= trigger_options::DATA_CHANGED;
    }
    if flag(obj, "qualityChange") {
        trigger_ops |= trigger_options::QUALITY_CHANGED;
    }
    if flag(obj, "dataUpdate") {
        trigger_ops |= trigger_options::DATA_UPDATE;
    }
    if flag(obj, "integrityCheck") {
        trigger_ops |= trigger_options::INTEGRITY;
    }

    LogControlBlock {
        name: string_field(obj, &["name"]).unwrap_or_else(|| default_name.to_string()),
        data_set: string_field(obj, &["dataset"]),
        log_ref: string_field(obj, &["logname"]),
        trigger_ops,
        intg_pd: int_field(obj, &["intg_pd"], 0) as u32,
        log_ena: flag(obj, "log_ena"),
        with_reason_code: flag(obj, "reasonForInclusion"),
    }
}

/// Attach PHY addresses from the top-level `communication` map to the
/// control blocks they reference by `<ld_name>/<cb_name>`.
fn apply_communication(model: &mut IedModel, model_obj: &Value) {
    let Some(access_points) = find_key(model_obj, "communication").and_then(Value::as_map) else {
        return;
    };

    for (_ap_name, ap_obj) in access_points {
        for (section, is_gse) in [("gse_addresses", true), ("smv_addresses", false)] {
            let Some(addresses) = find_key(ap_obj, section).and_then(Value::as_map) else {
                continue;
            };
            for (key, addr_obj) in addresses {
                let Some(target) = key.as_str() else {
                    continue;
                };
                let Some((ld_name, cb_name)) = target.split_once('/') else {
                    continue;
                };
                let address = parse_phy_address(addr_obj);
                attach_address(model, ld_name, cb_name, is_gse, &address);
            }
        }
    }
}

fn attach_address(
    model: &mut IedModel,
    ld_name: &str,
    cb_name: &str,
    is_gse: bool,
    address: &PhyComAddress,
) {
    for device in &mut model.devices {
        if device.name != ld_name {
            continue;
        }
        for node in &mut device.nodes {
            if is_gse {
                if let Some(cb) = node.gse_controls.iter_mut().find(|c| c.name == cb_name) {
                    cb.address = Some(address.clone());
                }
            } else if let Some(cb) = node.sv_controls.iter_mut().find(|c| c.name == cb_name) {
                cb.address = Some(address.clone());
            }
        }
    }
}

fn parse_phy_address(obj: &Value) -> PhyComAddress {
    let dst_mac = find_key(obj, "mac_address")
        .and_then(|v| v.as_str())
        .and_then(parse_mac)
        .unwrap_or_default();

    PhyComAddress {
        vlan_priority: int_field(obj, &["vlan_priority"], 4) as u8,
        vlan_id: find_key(obj, "vlan_id")
            .map(|v| parse_u32_auto(v, 0))
            .unwrap_or(0) as u16,
        app_id: find_key(obj, "appid")
            .map(|v| parse_u32_hex_default(v, 0))
            .unwrap_or(0) as u16,
        dst_mac,
    }
}

/// Accepts `01:0C:CD:01:00:01`, dashed, or bare hex; any non-hex character
/// is stripped and exactly 12 nibbles must remain.
fn parse_mac(text: &str) -> Option<[u8; 6]> {
    let hex: String = text.chars().filter(|c| c.is_ascii_hexdigit()).collect();
    if hex.len() != 12 {
        return None;
    }
    let mut mac = [0u8; 6];
    for (i, byte) in mac.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(mac)
}

// ---------------------------------------------------------------------------
// Field access and coercion helpers
// ---------------------------------------------------------------------------

fn field<'a>(obj: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| find_key(obj, key))
}

/// Non-empty string field; empty strings count as absent so they reach the
/// stack as null.
fn string_field(obj: &Value, keys: &[&str]) -> Option<String> {
    field(obj, keys)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

fn int_field(obj: &Value, keys: &[&str], fallback: i64) -> i64 {
    field(obj, keys).map(|v| as_i64(v, fallback)).unwrap_or(fallback)
}

/// Boolean flag on the block itself, falling back to its `options` submap.
fn flag(obj: &Value, key: &str) -> bool {
    if let Some(v) = find_key(obj, key) {
        return truthy(v);
    }
    find_key(obj, "options")
        .and_then(|options| find_key(options, key))
        .map(truthy)
        .unwrap_or(false)
}

/// Booleans, non-zero integers and the usual string spellings count as true.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Boolean(b) => *b,
        Value::Integer(_) => value.as_i64().unwrap_or(0) != 0 || value.as_u64().unwrap_or(0) != 0,
        Value::String(_) => value
            .as_str()
            .map(|s| {
                s.eq_ignore_ascii_case("true")
                    || s == "1"
                    || s.eq_ignore_ascii_case("yes")
                    || s.eq_ignore_ascii_case("on")
            })
            .unwrap_or(false),
        _ => false,
    }
}

/// Decimal, or hex when prefixed with `0x` or containing a hex letter.
fn parse_u32_auto(value: &Value, fallback: u32) -> u32 {
    if let Some(v) = value.as_u64() {
        return v as u32;
    }
    if let Some(v) = value.as_i64() {
        return v as u32;
    }
    let Some(text) = value.as_str() else {
        return fallback;
    };
    let text = text.trim();
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return u32::from_str_radix(hex, 16).unwrap_or(fallback);
    }
    if text.chars().any(|c| c.is_ascii_hexdigit() && c.is_ascii_alphabetic()) {
        return u32::from_str_radix(text, 16).unwrap_or(fallback);
    }
    text.parse().unwrap_or(fallback)
}

/// Hex unless the value already arrives as an integer.
fn parse_u32_hex_default(value: &Value, fallback: u32) -> u32 {
    if let Some(v) = value.as_u64() {
        return v as u32;
    }
    if let Some(v) = value.as_i64() {
        return v as u32;
    }
    let Some(text) = value.as_str() else {
        return fallback;
    };
    let text = text.trim();
    let text = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    u32::from_str_radix(text, 16).unwrap_or(fallback)
}

/// The five-name ctlModel vocabulary used for enumerated initial values.
fn ctl_model_index(text: &str) -> Option<i64> {
    match text {
        "status-only" => Some(0),
        "direct-with-normal-security" => Some(1),
        "sbo-with-normal-security" => Some(2),
        "direct-with-enhanced-security" => Some(3),
        "sbo-with-enhanced-security" => Some(4),
        _ => None,
    }
}

/// Build the initial value for a leaf attribute, coercing the payload to the
/// declared type. `None` means nothing gets attached.
fn value_from_payload(value: &Value, da_type: DaType) -> Option<MmsValue> {
    match da_type {
        DaType::Boolean => Some(MmsValue::Boolean(truthy(value))),
        DaType::Int8 | DaType::Int16 | DaType::Int32 | DaType::Int64 => {
            if let Some(v) = value.as_i64() {
                Some(MmsValue::Integer(v))
            } else {
                value
                    .as_str()
                    .and_then(|s| s.trim().parse::<i64>().ok())
                    .map(MmsValue::Integer)
            }
        }
        DaType::Enumerated => {
            if let Some(text) = value.as_str() {
                ctl_model_index(text)
                    .or_else(|| text.trim().parse::<i64>().ok())
                    .map(MmsValue::Integer)
            } else {
                value.as_i64().map(MmsValue::Integer)
            }
        }
        DaType::Int8u | DaType::Int16u | DaType::Int24u | DaType::Int32u => {
            Some(MmsValue::Unsigned(parse_u32_auto(value, 0)))
        }
        DaType::Float32 | DaType::Float64 => value.as_f64().map(MmsValue::Float),
        DaType::UnicodeString255 => value
            .as_str()
            .map(|s| MmsValue::MmsString(s.to_string())),
        DaType::VisString32
        | DaType::VisString64
        | DaType::VisString129
        | DaType::VisString255 => value
            .as_str()
            .map(|s| MmsValue::VisibleString(s.to_string())),
        _ => None,
    }
}

/// Case-insensitive type lookup accepting both the underscored and the
/// camel-case spellings. Unknown types fall back to `VIS_STRING_255`.
fn map_type(type_str: &str) -> DaType {
    let normalized: String = type_str
        .chars()
        .filter(|c| *c != '_')
        .map(|c| c.to_ascii_uppercase())
        .collect();
    match normalized.as_str() {
        "BOOLEAN" | "BOOL" => DaType::Boolean,
        "INT8" => DaType::Int8,
        "INT16" => DaType::Int16,
        "INT32" => DaType::Int32,
        "INT64" => DaType::Int64,
        "INT8U" => DaType::Int8u,
        "INT16U" => DaType::Int16u,
        "INT24U" => DaType::Int24u,
        "INT32U" => DaType::Int32u,
        "FLOAT32" => DaType::Float32,
        "FLOAT64" => DaType::Float64,
        "ENUM" | "ENUMERATED" => DaType::Enumerated,
        "VISSTRING32" => DaType::VisString32,
        "VISSTRING64" => DaType::VisString64,
        "VISSTRING129" => DaType::VisString129,
        "VISSTRING255" => DaType::VisString255,
        "UNICODESTRING255" => DaType::UnicodeString255,
        "OCTETSTRING64" => DaType::OctetString64,
        "QUALITY" => DaType::Quality,
        "TIMESTAMP" => DaType::Timestamp,
        "CHECK" => DaType::Check,
        "STRUCT" | "STRUCTURE" => DaType::Constructed,
        _ => DaType::VisString255,
    }
}

fn map_fc(fc_str: &str) -> Fc {
    match fc_str.to_ascii_uppercase().as_str() {
        "ST" => Fc::St,
        "MX" => Fc::Mx,
        "SP" => Fc::Sp,
        "SV" => Fc::Sv,
        "CF" => Fc::Cf,
        "DC" => Fc::Dc,
        "SG" => Fc::Sg,
        "SE" => Fc::Se,
        "SR" => Fc::Sr,
        "OR" => Fc::Or,
        "BL" => Fc::Bl,
        "EX" => Fc::Ex,
        "CO" => Fc::Co,
        _ => Fc::St,
    }
}
