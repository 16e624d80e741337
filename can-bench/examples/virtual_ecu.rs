//! Request/response check against a simulated motor controller
//!
//! Runs the MCM parameter read over the in-memory bus: the bench sends
//! MCM_Read_Write_Param_Command, a thread playing the MCM answers with
//! MCM_Read_Write_Param_Response, and the scenario checks the echoed address.
//!
//! Usage:
//!   cargo run -p can-bench --example virtual_ecu [address]

use can_bench::{
    BusChannel, FrameCodec, LoadOptions, MessageValues, RequestResponseScenario, ScenarioRunner,
    SignalDatabase, VirtualBus,
};
use std::env;
use std::thread;
use std::time::Duration;

const MCM_DBC: &str = r#"
VERSION ""

NS_ :

BS_:

BU_: VCU MCM

BO_ 193 MCM_Read_Write_Param_Command: 8 VCU
 SG_ MCM_Param_Address_Command : 0|16@1+ (1,0) [0|65535] "" MCM
 SG_ MCM_Read_Write_Command : 16|8@1+ (1,0) [0|1] "" MCM
 SG_ MCM_Data_Command : 32|16@1- (1,0) [-32768|32767] "" MCM

BO_ 194 MCM_Read_Write_Param_Response: 8 MCM
 SG_ MCM_Param_Address_Response : 0|16@1+ (1,0) [0|65535] "" VCU
 SG_ MCM_Write_Success : 16|8@1+ (1,0) [0|1] "" VCU
 SG_ MCM_Data_Response : 32|16@1- (1,0) [-32768|32767] "" VCU
"#;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let address = match env::args().nth(1) {
        Some(arg) => match arg.strip_prefix("0x") {
            Some(hex) => u16::from_str_radix(hex, 16)?,
            None => arg.parse()?,
        },
        None => 0x0123,
    };

    let db = SignalDatabase::from_dbc_str(MCM_DBC, LoadOptions::default())?;
    let (bench, mut mcm) = VirtualBus::pair();

    let report = thread::scope(|s| {
        let db = &db;
        s.spawn(move || {
            let response = db.message_by_name("MCM_Read_Write_Param_Response")?;
            while let Some(frame) = mcm.recv(Duration::from_millis(500))? {
                let request = FrameCodec::decode_frame(db, &frame)?;
                let Some(requested) = request.get("MCM_Param_Address_Command") else {
                    continue;
                };
                let reply = FrameCodec::encode(
                    response,
                    &[
                        ("MCM_Param_Address_Response", requested.as_f64()),
                        ("MCM_Data_Response", 1500.0),
                    ],
                )?;
                mcm.send(&reply)?;
            }
            Ok::<_, can_bench::HarnessError>(())
        });

        let scenario = RequestResponseScenario {
            name: format!("read MCM parameter 0x{:04X}", address),
            request: MessageValues::new("MCM_Read_Write_Param_Command")
                .with("MCM_Param_Address_Command", address as f64)
                .with("MCM_Read_Write_Command", 0.0),
            response: "MCM_Read_Write_Param_Response".to_string(),
            signal: "MCM_Param_Address_Response".to_string(),
            expected: address as f64,
            tolerance: None,
            timeout_s: 0.2,
            poll_s: 0.02,
        };
        ScenarioRunner::new(db).run_request_response(bench, &scenario)
    })?;

    println!("\n=== {} ===", report.name);
    println!("Outcome: {:?}", report.outcome);
    println!(
        "Frames: {} sent, {} received in {:.3} s",
        report.run.frames_sent,
        report.run.frames_received,
        report.run.elapsed.as_secs_f64()
    );
    Ok(())
}
