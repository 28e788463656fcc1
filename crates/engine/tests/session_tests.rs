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

//! Full-session test: waveform replay driving breakpoint evaluation.

use std::io::Cursor;
use std::sync::mpsc;
use std::sync::Arc;

use hdb_common::{BreakPoint, ContextVariable, GeneratorVariable, Instance, Variable};
use hdb_db::{SymbolDatabaseClient, SymbolStore};
use hdb_engine::{protocol::Response, Debugger};
use hdb_replay::{EmulationEngine, ReplayProvider, VcdDatabase};
use hdb_rtl::RtlClient;

const WAVEFORM: &str = "\
$timescale 1ns $end
$scope module top $end
$var wire 1 ! clk $end
$var wire 4 \" a $end
$upscope $end
$enddefinitions $end
$dumpvars
0!
b0 \"
$end
#10
1!
#20
0!
#25
b10 \"
#30
1!
#40
0!
";

fn symbol_store() -> SymbolStore {
    SymbolStore {
        breakpoints: vec![
            BreakPoint {
                id: 0,
                instance_id: Some(0),
                filename: "mod.py".to_string(),
                line_num: 1,
                column_num: 0,
                condition: String::new(),
            },
            BreakPoint {
                id: 1,
                instance_id: Some(0),
                filename: "mod.py".to_string(),
                line_num: 2,
                column_num: 0,
                condition: "a > 1".to_string(),
            },
        ],
        instances: vec![Instance { id: 0, name: "child".to_string() }],
        variables: vec![
            Variable { id: 0, value: "child.a".to_string(), is_rtl: true },
            Variable { id: 1, value: "16".to_string(), is_rtl: false },
        ],
        context_variables: vec![
            ContextVariable { name: "a".to_string(), breakpoint_id: 0, variable_id: 0 },
            ContextVariable { name: "a".to_string(), breakpoint_id: 1, variable_id: 0 },
        ],
        generator_variables: vec![GeneratorVariable {
            name: "WIDTH".to_string(),
            instance_id: 0,
            variable_id: 1,
        }],
        ..Default::default()
    }
}

#[test]
fn test_clock_driven_breakpoints() {
    let database = Arc::new(VcdDatabase::parse(Cursor::new(WAVEFORM)).unwrap());
    let provider = Arc::new(ReplayProvider::new(database));

    let symdb = SymbolDatabaseClient::from_store(symbol_store());
    let mapping = provider
        .database()
        .compute_instance_mapping(&symdb.get_instance_names())
        .unwrap();
    assert_eq!(mapping, ("child".to_string(), "top.".to_string()));
    provider.set_instance_mapping(&mapping.0, &mapping.1);

    let rtl = Arc::new(RtlClient::new(provider.clone()));
    let debugger = Arc::new(Debugger::new(rtl.clone()));
    debugger.initialize_db_client(symdb);

    let (tx, rx) = mpsc::channel::<String>();
    debugger.set_message_sink(Box::new(move |message| {
        let _ = tx.send(message);
    }));

    // arm both breakpoints through the wire protocol
    debugger.on_message(
        r#"{"type": "breakpoint", "action": "add", "filename": "mod.py", "line_num": 1}"#,
    );
    debugger.on_message(
        r#"{"type": "breakpoint", "action": "add", "filename": "mod.py", "line_num": 2}"#,
    );

    // evaluate on every rising clock edge, as the replay tool does
    let clk = rtl.get_handle("top.clk").unwrap();
    let session = debugger.clone();
    rtl.add_callback(
        "eval_clock",
        clk,
        Box::new(move |data| {
            if data.value.is_some_and(|value| value != 0) {
                session.eval();
            }
        }),
    )
    .unwrap();

    let engine = EmulationEngine::new(provider);
    let worker = std::thread::spawn(move || engine.run());

    // posedge at 10: a == 0, only the unconditional breakpoint fires
    // posedge at 30: a == 2, both fire in execution order
    let mut hits = Vec::new();
    while hits.len() < 3 {
        let message = rx.recv().unwrap();
        let Ok(response) = serde_json::from_str::<Response>(&message) else { continue };
        if let Response::BreakpointHit { time, id, instance_name, locals, generators, .. } =
            response
        {
            assert_eq!(instance_name, "child");
            assert_eq!(generators.get("WIDTH").map(String::as_str), Some("16"));
            hits.push((time, id, locals.get("a").cloned()));
            debugger.on_message(r#"{"type": "command", "command": "continue"}"#);
        }
    }
    worker.join().unwrap();

    assert_eq!(hits[0], (10, 0, Some("0".to_string())));
    assert_eq!(hits[1], (30, 0, Some("2".to_string())));
    assert_eq!(hits[2], (30, 1, Some("2".to_string())));
}
