// HDB - Hardware Debugger
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! End-to-end replay tests over recorded waveforms.

use std::collections::HashSet;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use hdb_replay::{EmulationEngine, ReplayProvider, VcdDatabase, WaveformDatabase};
use hdb_rtl::{RewindRequest, RtlClient, SimProvider};
use parking_lot::Mutex;

fn waveform1() -> VcdDatabase {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/vectors/waveform1.vcd");
    VcdDatabase::open(path).unwrap()
}

#[test]
fn test_vcd_parse() {
    let db = waveform1();

    // module resolution
    assert_eq!(db.get_instance_id("top"), Some(0));
    assert_eq!(db.get_instance_id("top.inst"), Some(1));
    assert_eq!(db.get_instance_id("top2"), None);
    assert_eq!(db.get_instance_id("top.inst2"), None);

    // signal resolution
    assert!(db.get_signal_id("top.clk").is_some());
    assert!(db.get_signal_id("top.inst.b").is_some());
    assert!(db.get_signal_id("top.result[0]").is_some());
    assert!(db.get_signal_id("clk").is_none());
    assert!(db.get_signal_id("top.inst.c").is_none());

    // signal enumeration: 4 scalars plus a 10-element array
    let signals = db.get_instance_signals(db.get_instance_id("top").unwrap());
    assert_eq!(signals.len(), 10 + 4);
    let signals = db.get_instance_signals(db.get_instance_id("top.inst").unwrap());
    assert_eq!(signals.len(), 3);
    assert!(db.get_instance_signals(3).is_empty());

    // child instances
    let children = db.get_child_instances(db.get_instance_id("top").unwrap());
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].name, "inst");
    assert!(db.get_child_instances(db.get_instance_id("top.inst").unwrap()).is_empty());
    assert!(db.get_child_instances(42).is_empty());

    let signal = db.get_signal(db.get_signal_id("top.a").unwrap()).unwrap();
    assert_eq!(signal.name, "a");
    assert_eq!(db.get_instance(0).as_deref(), Some("top"));

    // values
    let b = db.get_signal_id("top.inst.b").unwrap();
    assert_eq!(db.get_signal_value(b, 20).as_deref(), Some("1"));
    assert_eq!(db.get_signal_value(b, 40).as_deref(), Some("10"));
    let result2 = db.get_signal_id("top.result[2]").unwrap();
    assert_eq!(db.get_signal_value(result2, 40).as_deref(), Some("x"));
    assert_eq!(db.get_signal_value(result2, 61).as_deref(), Some("1"));
    let clk = db.get_signal_id("top.clk").unwrap();
    assert_eq!(db.get_signal_value(clk, 10).as_deref(), Some("1"));
}

#[test]
fn test_clk_callback() {
    let provider = Arc::new(ReplayProvider::new(Arc::new(waveform1())));
    let clk = provider.handle_by_name("top.clk").unwrap();

    let cycles = Arc::new(AtomicU64::new(0));
    let counter = cycles.clone();
    let registered = provider
        .register_value_callback(clk, Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
    assert!(registered.is_some());

    let engine = EmulationEngine::new(provider);
    engine.run();

    // 10 cycles, 2 edges per cycle
    assert_eq!(cycles.load(Ordering::SeqCst), 10 * 2);
}

#[test]
fn test_rewind() {
    let provider = Arc::new(ReplayProvider::new(Arc::new(waveform1())));
    let clk = provider.handle_by_name("top.clk").unwrap();

    let times: Arc<Mutex<HashSet<u64>>> = Arc::new(Mutex::new(HashSet::new()));
    let has_rewound = Arc::new(AtomicBool::new(false));
    let callback = {
        let provider = provider.clone();
        let times = times.clone();
        let has_rewound = has_rewound.clone();
        Box::new(move |data: &hdb_rtl::CallbackData| {
            if !has_rewound.swap(true, Ordering::SeqCst) {
                provider.rewind(&RewindRequest { time: 100, clock_signals: vec![clk] });
            } else {
                times.lock().insert(data.time);
            }
        })
    };
    assert!(provider.register_value_callback(clk, callback).is_some());

    let engine = EmulationEngine::new(provider);
    engine.run_detached();
    engine.finish();

    let times = times.lock();
    // rewinding to 100 resumes at the rising edge at 90
    for t in (10..90).step_by(10) {
        assert!(!times.contains(&t), "unexpected callback at {t}");
    }
    for t in (90..200).step_by(10) {
        assert!(times.contains(&t), "missing callback at {t}");
    }
}

#[test]
fn test_instance_mapping_through_rtl_client() {
    let db = Arc::new(waveform1());
    let mapping = db.compute_instance_mapping(&["child".to_string()]).unwrap();
    assert_eq!(mapping, ("child".to_string(), "top.inst.".to_string()));

    let provider = Arc::new(ReplayProvider::new(db));
    provider.set_instance_mapping(&mapping.0, &mapping.1);
    provider.set_timestamp(20);

    let client = RtlClient::new(provider);
    client.initialize_instance_mapping(&["child".to_string()]);
    assert_eq!(client.get_full_name("child.b"), "top.inst.b");
    assert_eq!(client.get_value("child.b"), Some(1));
}

const ARRAY_VCD: &str = "\
$timescale 1ns $end
$scope module top $end
$scope module dut $end
$scope module a $end
$scope module 0 $end
$var wire 4 ! 0 $end
$var wire 4 \" 1 $end
$upscope $end
$upscope $end
$scope module b $end
$scope module 0 $end
$var wire 4 # 0 $end
$var wire 4 $ 1 $end
$upscope $end
$upscope $end
$upscope $end
$upscope $end
$enddefinitions $end
#0
b0 !
b0 \"
b0 #
b0 $
#10
b101 !
b110 \"
b111 #
b1000 $
";

#[test]
fn test_array_table() {
    let db = Arc::new(VcdDatabase::parse(Cursor::new(ARRAY_VCD)).unwrap());
    let provider = Arc::new(ReplayProvider::new(db));
    let names = vec!["top.dut.a.0.0".to_string(), "top.dut.a.0.1".to_string()];
    provider.build_array_table(&names);
    provider.set_timestamp(15);

    let client = RtlClient::new(provider);
    // pre-registered aliases
    assert_eq!(client.get_value("top.dut.a[0][0]"), Some(5));
    assert_eq!(client.get_value("top.dut.a[0][1]"), Some(6));
    // indexed accesses resolve even without the table
    assert_eq!(client.get_value("top.dut.b[0][0]"), Some(7));
    assert_eq!(client.get_value("top.dut.b[0][1]"), Some(8));
    // dotted accesses keep working
    assert_eq!(client.get_value("top.dut.a.0.1"), Some(6));
}

#[test]
fn test_set_timestamp_pins_values() {
    let provider = Arc::new(ReplayProvider::new(Arc::new(waveform1())));
    let b = provider.handle_by_name("top.inst.b").unwrap();

    provider.set_timestamp(20);
    assert_eq!(provider.get_value(b), Some(1));
    provider.set_timestamp(40);
    assert_eq!(provider.get_value(b), Some(2));

    // x bits surface as absent
    let result2 = provider.handle_by_name("top.result[2]").unwrap();
    provider.set_timestamp(40);
    assert_eq!(provider.get_value(result2), None);
    assert_eq!(provider.get_value_str(result2).as_deref(), Some("x"));
}
