//! Dynamic model builder tests: tree construction, initial values, data
//! sets, control blocks and communication addresses.

use rmpv::Value;

use iecsim::iec::model::{trigger_options, SmpMod};
use iecsim::iec::{DaType, Fc, MmsValue};
use iecsim::model::build_model;

fn map(entries: Vec<(&str, Value)>) -> Value {
    Value::Map(
        entries
            .into_iter()
            .map(|(k, v)| (Value::from(k), v))
            .collect(),
    )
}

/// A model exercising attributes, data sets and every control block kind.
fn full_model() -> Value {
    let pos = map(vec![
        ("cdc", Value::from("DPC")),
        (
            "attributes",
            map(vec![
                (
                    "stVal",
                    map(vec![
                        ("type", Value::from("BOOLEAN")),
                        ("fc", Value::from("ST")),
                        ("value", Value::from(true)),
                    ]),
                ),
                (
                    "ctlModel",
                    map(vec![
                        ("type", Value::from("ENUM")),
                        ("fc", Value::from("CF")),
                        ("value", Value::from("direct-with-normal-security")),
                    ]),
                ),
                (
                    "origin",
                    map(vec![
                        ("fc", Value::from("ST")),
                        (
                            "attributes",
                            map(vec![
                                (
                                    "orCat",
                                    map(vec![
                                        ("type", Value::from("INT32U")),
                                        ("fc", Value::from("ST")),
                                        ("value", Value::from("0x10")),
                                    ]),
                                ),
                                (
                                    "orIdent",
                                    map(vec![
                                        ("type", Value::from("VisString64")),
                                        ("fc", Value::from("st")),
                                        ("value", Value::from("bay1")),
                                    ]),
                                ),
                            ]),
                        ),
                    ]),
                ),
            ]),
        ),
    ]);

    let amps = map(vec![
        ("cdc", Value::from("MV")),
        (
            "attributes",
            map(vec![(
                "mag",
                map(vec![
                    ("type", Value::from("FLOAT32")),
                    ("fc", Value::from("MX")),
                    ("value", Value::from(12.5)),
                ]),
            )]),
        ),
    ]);

    let lln0 = map(vec![
        (
            "data_objects",
            map(vec![(
                "Mod",
                map(vec![
                    ("cdc", Value::from("ENC")),
                    (
                        "attributes",
                        map(vec![(
                            "stVal",
                            map(vec![
                                ("type", Value::from("INT32")),
                                ("fc", Value::from("ST")),
                                ("value", Value::from(1)),
                            ]),
                        )]),
                    ),
                ]),
            )]),
        ),
        (
            "data_sets",
            map(vec![(
                "Measurements",
                map(vec![(
                    "fcdas",
                    Value::Array(vec![
                        Value::from("PROT/XCBR1.Pos.stVal"),
                        Value::from(""),
                        Value::from("PROT/MMXU1.A.mag"),
                    ]),
                )]),
            )]),
        ),
        (
            "report_controls",
            map(vec![(
                "urcb01",
                map(vec![
                    ("rptid", Value::from("Events")),
                    ("dataset", Value::from("Measurements")),
                    ("buffered", Value::from(true)),
                    ("confRev", Value::from(7)),
                    ("buf_time", Value::from(50)),
                    ("intg_pd", Value::from(1000)),
                    ("dataChange", Value::from(true)),
                    ("integrityCheck", Value::from(true)),
                    ("gi", Value::from(true)),
                    ("seqNum", Value::from(true)),
                    ("timeStamp", Value::from(true)),
                ]),
            )]),
        ),
        (
            "gse_controls",
            map(vec![(
                "gocb1",
                map(vec![
                    ("gocbname", Value::from("events")),
                    ("dataset", Value::from("Measurements")),
                    ("fixed_offsets", Value::from(true)),
                    ("min_time", Value::from(4)),
                    ("time_allowed_to_live", Value::from(2000)),
                ]),
            )]),
        ),
        (
            "smv_controls",
            map(vec![(
                "smvcb1",
                map(vec![
                    ("smvcbname", Value::from("volt")),
                    ("dataset", Value::from("Measurements")),
                    ("smpmod", Value::from("SmpPerSec")),
                    ("smprate", Value::from(4000)),
                    ("is_unicast", Value::from(true)),
                    ("sampleRate", Value::from(true)),
                ]),
            )]),
        ),
        (
            "log_controls",
            map(vec![
                (
                    "lcb1",
                    map(vec![
                        ("dataset", Value::from("Measurements")),
                        ("logname", Value::from("EventLog")),
                        ("log_ena", Value::from(true)),
                        ("intg_pd", Value::from(500)),
                        ("dataChange", Value::from(true)),
                        ("reasonForInclusion", Value::from(true)),
                    ]),
                ),
                (
                    "lcb2",
                    map(vec![
                        ("dataset", Value::from("Measurements")),
                        ("logname", Value::from("EventLog")),
                    ]),
                ),
            ]),
        ),
        (
            "setting_group_control",
            map(vec![
                ("act_sg", Value::from(2)),
                ("num_of_sgs", Value::from(4)),
            ]),
        ),
    ]);

    let xcbr = map(vec![("data_objects", map(vec![("Pos", pos)]))]);
    let mmxu = map(vec![
        ("data_objects", map(vec![("A", amps)])),
        (
            "setting_group_control",
            map(vec![("act_sg", Value::from(3))]),
        ),
    ]);

    map(vec![
        ("name", Value::from("IED_TEST")),
        (
            "logical_devices",
            map(vec![(
                "PROT",
                map(vec![(
                    "logical_nodes",
                    map(vec![("LLN0", lln0), ("XCBR1", xcbr), ("MMXU1", mmxu)]),
                )]),
            )]),
        ),
        (
            "communication",
            map(vec![(
                "AP1",
                map(vec![
                    (
                        "gse_addresses",
                        map(vec![(
                            "PROT/gocb1",
                            map(vec![
                                ("mac_address", Value::from("01:0C:CD:01:00:FF")),
                                ("appid", Value::from("4000")),
                                ("vlan_priority", Value::from(6)),
                                ("vlan_id", Value::from("0x005")),
                            ]),
                        )]),
                    ),
                    (
                        "smv_addresses",
                        map(vec![(
                            "PROT/smvcb1",
                            map(vec![
                                ("mac_address", Value::from("01-0C-CD-04-00-01")),
                                ("appid", Value::from(16384)),
                            ]),
                        )]),
                    ),
                ]),
            )]),
        ),
    ])
}

#[test]
fn builds_attributes_with_initial_values() {
    let built = build_model(&full_model());
    assert_eq!(built.ied_name, "IED_TEST");

    let model = built.model.read().unwrap();
    let stval = model.resolve_attribute("PROT/XCBR1.Pos.stVal").unwrap();
    assert_eq!(stval.da_type, DaType::Boolean);
    assert_eq!(stval.fc, Fc::St);
    assert_eq!(stval.value, Some(MmsValue::Boolean(true)));

    // ctlModel vocabulary maps to its enum ordinal.
    let ctl = model.resolve_attribute("PROT/XCBR1.Pos.ctlModel").unwrap();
    assert_eq!(ctl.da_type, DaType::Enumerated);
    assert_eq!(ctl.fc, Fc::Cf);
    assert_eq!(ctl.value, Some(MmsValue::Integer(1)));

    // Nested attributes force the parent to CONSTRUCTED, no value attached.
    let origin = model.resolve_attribute("PROT/XCBR1.Pos.origin").unwrap();
    assert_eq!(origin.da_type, DaType::Constructed);
    assert!(origin.value.is_none());

    // Auto-base unsigned parse and camel-case type spelling.
    let orcat = model
        .resolve_attribute("PROT/XCBR1.Pos.origin.orCat")
        .unwrap();
    assert_eq!(orcat.da_type, DaType::Int32u);
    assert_eq!(orcat.value, Some(MmsValue::Unsigned(16)));

    let orident = model
        .resolve_attribute("PROT/XCBR1.Pos.origin.orIdent")
        .unwrap();
    assert_eq!(orident.da_type, DaType::VisString64);
    assert_eq!(
        orident.value,
        Some(MmsValue::VisibleString("bay1".to_string()))
    );

    let mag = model.resolve_attribute("PROT/MMXU1.A.mag").unwrap();
    assert_eq!(mag.da_type, DaType::Float32);
    assert_eq!(mag.value, Some(MmsValue::Float(12.5)));
}

#[test]
fn unknown_types_fall_back_to_visible_string() {
    let description = map(vec![
        ("name", Value::from("IED")),
        (
            "logical_devices",
            map(vec![(
                "LD0",
                map(vec![(
                    "logical_nodes",
                    map(vec![(
                        "GGIO1",
                        map(vec![(
                            "data_objects",
                            map(vec![(
                                "Desc",
                                map(vec![
                                    ("cdc", Value::from("DPL")),
                                    (
                                        "attributes",
                                        map(vec![(
                                            "d",
                                            map(vec![
                                                ("type", Value::from("weird")),
                                                ("fc", Value::from("zz")),
                                            ]),
                                        )]),
                                    ),
                                ]),
                            )]),
                        )]),
                    )]),
                )]),
            )]),
        ),
    ]);

    let built = build_model(&description);
    let model = built.model.read().unwrap();
    let attr = model.resolve_attribute("LD0/GGIO1.Desc.d").unwrap();
    assert_eq!(attr.da_type, DaType::VisString255);
    assert_eq!(attr.fc, Fc::St);
}

#[test]
fn data_sets_skip_empty_entries() {
    let built = build_model(&full_model());
    let model = built.model.read().unwrap();
    let lln0 = model.device("PROT").unwrap().node("LLN0").unwrap();

    assert_eq!(lln0.data_sets.len(), 1);
    let ds = &lln0.data_sets[0];
    assert_eq!(ds.name, "Measurements");
    assert_eq!(ds.entries, vec!["PROT/XCBR1.Pos.stVal", "PROT/MMXU1.A.mag"]);
}

#[test]
fn report_control_fields_and_bits() {
    let built = build_model(&full_model());
    let model = built.model.read().unwrap();
    let lln0 = model.device("PROT").unwrap().node("LLN0").unwrap();

    let rcb = &lln0.report_controls[0];
    assert_eq!(rcb.name, "urcb01");
    assert_eq!(rcb.rpt_id.as_deref(), Some("Events"));
    assert_eq!(rcb.data_set.as_deref(), Some("Measurements"));
    assert!(rcb.buffered);
    assert_eq!(rcb.conf_rev, 7);
    assert_eq!(rcb.buf_time, 50);
    assert_eq!(rcb.intg_pd, 1000);
    assert_ne!(rcb.trigger_ops & trigger_options::DATA_CHANGED, 0);
    assert_ne!(rcb.trigger_ops & trigger_options::INTEGRITY, 0);
    assert_ne!(rcb.trigger_ops & trigger_options::GI, 0);
    assert_eq!(rcb.trigger_ops & trigger_options::QUALITY_CHANGED, 0);
    assert_ne!(rcb.options, 0);
}

#[test]
fn gse_control_with_communication_address() {
    let built = build_model(&full_model());
    let model = built.model.read().unwrap();
    let lln0 = model.device("PROT").unwrap().node("LLN0").unwrap();

    let gocb = &lln0.gse_controls[0];
    assert_eq!(gocb.app_id.as_deref(), Some("events"));
    assert!(gocb.fixed_offs);
    assert_eq!(gocb.min_time, 4);
    assert_eq!(gocb.max_time, 2000);

    let address = gocb.address.as_ref().expect("PHY address attached");
    assert_eq!(address.dst_mac, [0x01, 0x0C, 0xCD, 0x01, 0x00, 0xFF]);
    assert_eq!(address.app_id, 0x4000);
    assert_eq!(address.vlan_priority, 6);
    assert_eq!(address.vlan_id, 5);
}

#[test]
fn smv_control_with_communication_address() {
    let built = build_model(&full_model());
    let model = built.model.read().unwrap();
    let lln0 = model.device("PROT").unwrap().node("LLN0").unwrap();

    let smvcb = &lln0.sv_controls[0];
    assert_eq!(smvcb.sv_id.as_deref(), Some("volt"));
    assert_eq!(smvcb.smp_mod, SmpMod::SamplesPerSecond);
    assert_eq!(smvcb.smp_rate, 4000);
    assert!(smvcb.is_unicast);

    let address = smvcb.address.as_ref().expect("PHY address attached");
    assert_eq!(address.dst_mac, [0x01, 0x0C, 0xCD, 0x04, 0x00, 0x01]);
    assert_eq!(address.app_id, 16384);
}

#[test]
fn log_controls_create_one_log_per_distinct_name() {
    let built = build_model(&full_model());
    let model = built.model.read().unwrap();
    let lln0 = model.device("PROT").unwrap().node("LLN0").unwrap();

    assert_eq!(lln0.log_controls.len(), 2);
    assert_eq!(lln0.logs.len(), 1);
    assert_eq!(lln0.logs[0].name, "EventLog");

    let lcb = &lln0.log_controls[0];
    assert!(lcb.log_ena);
    assert!(lcb.with_reason_code);
    assert_eq!(lcb.intg_pd, 500);
    assert_ne!(lcb.trigger_ops & trigger_options::DATA_CHANGED, 0);
}

#[test]
fn setting_group_control_only_on_lln0() {
    let built = build_model(&full_model());
    let model = built.model.read().unwrap();
    let device = model.device("PROT").unwrap();

    let sgcb = device
        .node("LLN0")
        .unwrap()
        .setting_group_control
        .as_ref()
        .expect("SGCB on LLN0");
    assert_eq!(sgcb.act_sg, 2);
    assert_eq!(sgcb.num_of_sgs, 4);

    assert!(device.node("MMXU1").unwrap().setting_group_control.is_none());
}

#[test]
fn empty_description_builds_a_bare_model() {
    let built = build_model(&map(vec![]));
    assert_eq!(built.ied_name, "IED");
    assert!(built.model.read().unwrap().devices.is_empty());
}
