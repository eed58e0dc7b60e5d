mod common;

use std::path::Path;

use nem_vm::device::load_root_file;
use nem_vm::prelude::*;

fn resolve_text(text: &str) -> (Catalog, Collector) {
    let mut sources = SourceMap::new();
    let mut collector = Collector::new();
    let doc = parse_document(text, sources.intern("catalog.nemc"), &mut collector);
    let catalog = resolve(&[doc], &mut collector);
    (catalog, collector)
}

const FAMILIES: &str = r#"
family gemm.float<T : f16 | bf16 | f32> {
    operand a : in T
    operand b : in T
    operand bias : in T
    operand c : out T
    variant no_bias {
        bias = absent
        must(f16)
        may(bf16, f32)
    }
}

family conv2d.int8 {
    operand x : in i8
    operand w : in i8
    operand y : out i32
    variant no_bias {
        must()
    }
}
"#;

fn parent_child(extra: &str) -> String {
    format!(
        r#"{FAMILIES}
device base {{
    spec_version = "nem-1.0"
    topology {{
        engines = 1
        l2_size_bytes = 4194304
        per_engine {{ cstl = 2, l1_size_bytes = 1048576 }}
    }}
    unit_characteristics {{
        cstl {{ macs_per_cycle = 128 }}
    }}
    opcode.mandatory {{
        gemm.float<f16>.no_bias
        conv2d.int8.no_bias
    }}
}}

device child extends base {{
    opcode.extended {{
        gemm.float<bf16>.no_bias
    }}
    {extra}
}}
"#
    )
}

#[test]
fn inheritance_merges_topology_and_unions_sets() {
    let (catalog, collector) = resolve_text(&parent_child(""));
    assert!(!collector.has_errors(), "{:?}", collector.into_vec());

    let base = catalog.device("base").unwrap();
    let child = catalog.device("child").unwrap();

    // Topology inherited as a whole.
    let topology = child.topology.as_ref().unwrap();
    assert_eq!(topology.engines, 1);
    assert_eq!(topology.l2_size, 4 * 1024 * 1024);
    assert_eq!(topology.l1_size, 1024 * 1024);
    assert_eq!(topology.per_engine_units["cstl"], 2);

    // Mandatory inherited unchanged, extended is the child's addition.
    assert_eq!(child.mandatory, base.mandatory);
    assert_eq!(child.mandatory.len(), 2);
    let bf16: VariantRef = "gemm.float<bf16>.no_bias".parse().unwrap();
    assert_eq!(child.extended.iter().collect::<Vec<_>>(), vec![&bf16]);

    // Effective set per operator is the union restricted to its families.
    let effective = child.effective(&["gemm.float".to_string()]);
    let expected: Vec<VariantRef> = vec![
        "gemm.float<f16>.no_bias".parse().unwrap(),
        "gemm.float<bf16>.no_bias".parse().unwrap(),
    ];
    assert_eq!(
        effective,
        expected.into_iter().collect(),
        "effective = mandatory union extended"
    );

    assert_eq!(child.spec_version, "nem-1.0");
    assert_eq!(child.characteristics["cstl"]["macs_per_cycle"], 128);
}

#[test]
fn child_topology_replaces_parent_wholesale() {
    let extra = r#"
    topology {
        engines = 2
        l2_size_bytes = 8388608
        per_engine { vec = 1, l1_size_bytes = 524288 }
    }
    "#;
    let (catalog, collector) = resolve_text(&parent_child(extra));
    assert!(!collector.has_errors(), "{:?}", collector.into_vec());
    let topology = catalog.device("child").unwrap().topology.clone().unwrap();
    assert_eq!(topology.engines, 2);
    assert_eq!(topology.l1_size, 524288);
    // The parent's cstl counts do not leak through.
    assert!(!topology.per_engine_units.contains_key("cstl"));
}

#[test]
fn characteristics_merge_with_per_key_override() {
    let extra = r#"
    unit_characteristics {
        cstl { macs_per_cycle = 256, esoteric_vendor_knob = 7 }
        vec { lanes = 32 }
    }
    "#;
    let (catalog, collector) = resolve_text(&parent_child(extra));
    assert!(!collector.has_errors());
    let child = catalog.device("child").unwrap();
    assert_eq!(child.characteristics["cstl"]["macs_per_cycle"], 256);
    // Unknown keys are preserved verbatim.
    assert_eq!(child.characteristics["cstl"]["esoteric_vendor_knob"], 7);
    assert_eq!(child.characteristics["vec"]["lanes"], 32);
}

#[test]
fn mandatory_and_extended_must_stay_disjoint() {
    let extra = r#"
    opcode.extended {
        gemm.float<f16>.no_bias
    }
    "#;
    let (_, collector) = resolve_text(&parent_child(extra));
    assert!(collector
        .errors()
        .any(|d| d.message().contains("both mandatory and extended")));
}

#[test]
fn missing_must_variant_is_rejected() {
    let text = format!(
        r#"{FAMILIES}
device partial {{
    spec_version = "nem-1.0"
    topology {{
        engines = 1
        l2_size_bytes = 65536
        per_engine {{ cstl = 1, l1_size_bytes = 4096 }}
    }}
    opcode.mandatory {{
        gemm.float<f16>.no_bias
    }}
}}
"#
    );
    let (_, collector) = resolve_text(&text);
    common::assert_one_error_containing(&collector, "conv2d.int8.no_bias");
}

#[test]
fn abstract_devices_skip_must_coverage() {
    let text = format!(
        r#"{FAMILIES}
device shape_only {{
    spec_version = "nem-1.0"
}}
"#
    );
    let (catalog, collector) = resolve_text(&text);
    assert!(!collector.has_errors(), "{:?}", collector.into_vec());
    assert!(catalog.device("shape_only").unwrap().is_abstract());
}

#[test]
fn inheritance_cycles_are_rejected() {
    let text = r#"
device a extends b {
}
device b extends a {
}
"#;
    let (catalog, collector) = resolve_text(text);
    assert!(collector
        .errors()
        .any(|d| d.message().contains("inheritance cycle")));
    assert!(catalog.devices.is_empty());
}

#[test]
fn child_cannot_redeclare_spec_version() {
    let extra = r#"spec_version = "nem-2.0""#;
    let (catalog, collector) = resolve_text(&parent_child(extra));
    assert!(collector
        .errors()
        .any(|d| d.message().contains("must not redeclare")));
    assert!(catalog.device("child").is_none());
}

#[test]
fn duplicate_devices_and_missing_parents_are_reported() {
    let text = r#"
device twice { spec_version = "nem-1.0" }
device twice { spec_version = "nem-1.0" }
device orphan extends nowhere { }
"#;
    let (_, collector) = resolve_text(text);
    let messages = common::error_messages(&collector);
    assert!(messages.iter().any(|m| m.contains("duplicate device")));
    assert!(messages.iter().any(|m| m.contains("unknown device `nowhere`")));
}

#[test]
fn unknown_variant_references_are_reported() {
    let text = format!(
        r#"{FAMILIES}
device dev {{
    spec_version = "nem-1.0"
    opcode.extended {{
        gemm.float<f64>.no_bias
    }}
}}
"#
    );
    let (_, collector) = resolve_text(&text);
    assert!(collector.has_errors());
}

#[test]
fn includes_resolve_across_files_with_cycle_detection() {
    let loader = MapLoader::new()
        .with("configs/root.nemc", "include \"families.nemc\"\ninclude \"devices/base.nemc\"\ndevice top extends base { }")
        .with("configs/families.nemc", common::STD_CATALOG)
        .with(
            "configs/devices/base.nemc",
            "include \"../families.nemc\"\ndevice base { spec_version = \"nem-1.0\" }",
        );
    let mut sources = SourceMap::new();
    let mut collector = Collector::new();
    let docs = load_root_file(
        Path::new("configs/root.nemc"),
        &loader,
        &mut sources,
        &mut collector,
    );
    // families.nemc is reached twice but parsed once.
    assert_eq!(docs.len(), 3);
    let catalog = resolve(&docs, &mut collector);
    assert!(!collector.has_errors(), "{:?}", collector.into_vec());
    assert!(catalog.device("top").unwrap().is_abstract());
    assert_eq!(catalog.families.len(), 13);
}

#[test]
fn registry_verifies_against_the_standard_catalog() {
    let (catalog, collector) = resolve_text(common::STD_CATALOG);
    assert!(!collector.has_errors(), "{:?}", collector.into_vec());
    let registry = Registry::load_default().unwrap();
    registry.verify_against(&catalog).expect("every family resolves");

    // A trimmed catalog leaves dangling references behind.
    let (small, _) = resolve_text(FAMILIES);
    let err = registry.verify_against(&small).unwrap_err();
    assert!(matches!(err, RegistryError::Reference { .. }));
}
