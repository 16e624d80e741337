//! DBC file parser
//!
//! Parses Vector DBC text with `can-dbc` and converts it into our message and
//! signal definitions. Validation happens in [`SignalDatabase::load`].

use crate::signals::database::{
    ByteOrder, LoadOptions, MessageDefinition, MultiplexerInfo, SignalDatabase, SignalDefinition,
    ValueType,
};
use crate::types::{HarnessError, Result};
use std::path::Path;

/// Bit 31 of a DBC message id marks a 29-bit extended identifier
const DBC_EXTENDED_FLAG: u32 = 0x8000_0000;

impl SignalDatabase {
    /// Load and validate a DBC file
    pub fn load_dbc_file(path: &Path, options: LoadOptions) -> Result<Self> {
        let messages = parse_dbc_file(path)?;
        Self::load(messages, options)
    }

    /// Load and validate DBC text held in memory
    pub fn from_dbc_str(content: &str, options: LoadOptions) -> Result<Self> {
        let messages = parse_dbc_bytes(content.as_bytes(), "<memory>")?;
        Self::load(messages, options)
    }
}

/// Parse a DBC file and return message definitions
pub fn parse_dbc_file(path: &Path) -> Result<Vec<MessageDefinition>> {
    log::info!("Parsing DBC file: {:?}", path);

    let bytes = std::fs::read(path).map_err(|e| {
        HarnessError::DatabaseLoad(format!("Failed to read file {:?}: {}", path, e))
    })?;

    let source_filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown.dbc")
        .to_string();

    let messages = parse_dbc_bytes(&bytes, &source_filename)?;
    log::info!("Parsed {} messages from {:?}", messages.len(), path);
    Ok(messages)
}

fn parse_dbc_bytes(bytes: &[u8], source: &str) -> Result<Vec<MessageDefinition>> {
    // Exported DBCs are frequently Windows-1252; fall back to Latin-1
    let dbc_content = match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            log::warn!("DBC source {} is not UTF-8, trying Latin-1 encoding", source);
            bytes.iter().map(|&b| b as char).collect()
        }
    };

    let dbc = can_dbc::DBC::from_slice(dbc_content.as_bytes()).map_err(|e| {
        HarnessError::DatabaseLoad(format!("Failed to parse DBC {}: {:?}", source, e))
    })?;

    dbc.messages()
        .iter()
        .map(|dbc_msg| convert_message(dbc_msg, source))
        .collect()
}

/// Convert a can-dbc message to our MessageDefinition
fn convert_message(dbc_msg: &can_dbc::Message, source: &str) -> Result<MessageDefinition> {
    let multiplexer_signal_name = dbc_msg
        .signals()
        .iter()
        .find(|s| matches!(s.multiplexer_indicator(), can_dbc::MultiplexIndicator::Multiplexor))
        .map(|s| s.name().to_string());

    let signals = dbc_msg
        .signals()
        .iter()
        .map(|dbc_sig| convert_signal(dbc_sig, multiplexer_signal_name.as_deref()))
        .collect::<Result<Vec<_>>>()?;

    let raw_id = dbc_msg.message_id().0;
    let is_extended = raw_id & DBC_EXTENDED_FLAG != 0;

    Ok(MessageDefinition {
        id: raw_id & !DBC_EXTENDED_FLAG,
        is_extended,
        name: dbc_msg.message_name().to_string(),
        size: *dbc_msg.message_size() as usize,
        sender: match dbc_msg.transmitter() {
            can_dbc::Transmitter::NodeName(name) => Some(name.to_string()),
            _ => None,
        },
        signals,
        multiplexer_signal: multiplexer_signal_name,
        source: source.to_string(),
    })
}

/// Convert a can-dbc signal to our SignalDefinition
fn convert_signal(
    dbc_sig: &can_dbc::Signal,
    multiplexer_signal_name: Option<&str>,
) -> Result<SignalDefinition> {
    let byte_order = match *dbc_sig.byte_order() {
        can_dbc::ByteOrder::LittleEndian => ByteOrder::LittleEndian,
        can_dbc::ByteOrder::BigEndian => ByteOrder::BigEndian,
    };

    let value_type = match *dbc_sig.value_type() {
        can_dbc::ValueType::Signed => ValueType::Signed,
        can_dbc::ValueType::Unsigned => ValueType::Unsigned,
    };

    let multiplexer_info = match *dbc_sig.multiplexer_indicator() {
        can_dbc::MultiplexIndicator::MultiplexedSignal(switch_value) => Some(MultiplexerInfo {
            multiplexer_signal: multiplexer_signal_name
                .ok_or_else(|| {
                    HarnessError::DatabaseLoad(format!(
                        "Multiplexed signal '{}' but no multiplexer found",
                        dbc_sig.name()
                    ))
                })?
                .to_string(),
            multiplexer_values: vec![switch_value as u64],
        }),
        _ => None,
    };

    Ok(SignalDefinition {
        name: dbc_sig.name().to_string(),
        start_bit: *dbc_sig.start_bit() as u16,
        length: *dbc_sig.signal_size() as u16,
        byte_order,
        value_type,
        factor: *dbc_sig.factor(),
        offset: *dbc_sig.offset(),
        min: *dbc_sig.min(),
        max: *dbc_sig.max(),
        unit: if dbc_sig.unit().is_empty() {
            None
        } else {
            Some(dbc_sig.unit().to_string())
        },
        multiplexer_info,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const BENCH_DBC: &str = r#"
VERSION ""

NS_ :

BS_:

BU_: VCU MCM

BO_ 193 MCM_Read_Write_Param_Command: 8 VCU
 SG_ MCM_Param_Address_Command : 0|16@1+ (1,0) [0|65535] "" MCM
 SG_ MCM_Read_Write_Command : 16|8@1+ (1,0) [0|1] "" MCM
 SG_ MCM_Data_Command : 32|16@1- (1,0) [-32768|32767] "" MCM

BO_ 165 MCM_Motor_Position_Info: 8 MCM
 SG_ MCM_Motor_Speed : 16|16@1- (1,0) [-32768|32767] "rpm" VCU

BO_ 2147484421 Extended_Status: 8 VCU
 SG_ Status_Counter : 0|8@1+ (1,0) [0|255] "" MCM
"#;

    #[test]
    fn test_parse_bench_dbc() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(BENCH_DBC.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let messages = parse_dbc_file(temp_file.path()).unwrap();
        assert_eq!(messages.len(), 3);

        let command = &messages[0];
        assert_eq!(command.id, 0xC1);
        assert!(!command.is_extended);
        assert_eq!(command.name, "MCM_Read_Write_Param_Command");
        assert_eq!(command.size, 8);
        assert_eq!(command.sender, Some("VCU".to_string()));
        assert_eq!(command.signals.len(), 3);

        let data = command.signal("MCM_Data_Command").unwrap();
        assert_eq!(data.start_bit, 32);
        assert_eq!(data.length, 16);
        assert_eq!(data.value_type, ValueType::Signed);
        assert_eq!(data.byte_order, ByteOrder::LittleEndian);

        let speed = messages[1].signal("MCM_Motor_Speed").unwrap();
        assert_eq!(speed.unit, Some("rpm".to_string()));
    }

    #[test]
    fn test_extended_id_flag_is_stripped() {
        let db = SignalDatabase::from_dbc_str(BENCH_DBC, LoadOptions::default()).unwrap();
        let msg = db.message_by_name("Extended_Status").unwrap();
        assert!(msg.is_extended);
        assert_eq!(msg.id, 0x305);
        assert_eq!(db.message_by_id(0x305, true).unwrap().name, "Extended_Status");
        assert!(db.message_by_id(0x305, false).is_err());
    }

    #[test]
    fn test_parse_multiplexed_signals() {
        let dbc_content = r#"
VERSION ""

NS_ :

BS_:

BU_: ECU1

BO_ 512 MultiplexedMsg: 8 ECU1
 SG_ Mode M : 0|8@1+ (1,0) [0|3] "" ECU1
 SG_ SignalA m0 : 8|16@1+ (1,0) [0|100] "%" ECU1
 SG_ SignalB m1 : 8|16@1+ (0.1,0) [0|1000] "mV" ECU1
"#;

        let db = SignalDatabase::from_dbc_str(dbc_content, LoadOptions::default()).unwrap();
        let msg = db.message_by_id(512, false).unwrap();
        assert_eq!(msg.multiplexer_signal, Some("Mode".to_string()));

        let sig_a = msg.signal("SignalA").unwrap();
        let info = sig_a.multiplexer_info.as_ref().unwrap();
        assert_eq!(info.multiplexer_signal, "Mode");
        assert_eq!(info.multiplexer_values, vec![0]);
    }

    #[test]
    fn test_overlapping_dbc_rejected_unless_lenient() {
        let dbc_content = r#"
VERSION ""

NS_ :

BS_:

BU_: ECU1

BO_ 1291 VCU_LC_Status_A: 8 ECU1
 SG_ SlipRatio : 0|16@1+ (1,0) [0|65535] "" ECU1
 SG_ SlipRatioScaled : 8|16@1+ (0.01,0) [0|655.35] "" ECU1
"#;

        let strict = SignalDatabase::from_dbc_str(dbc_content, LoadOptions::default());
        assert!(matches!(strict, Err(HarnessError::DatabaseLoad(_))));

        let lenient = SignalDatabase::from_dbc_str(dbc_content, LoadOptions::lenient()).unwrap();
        assert_eq!(lenient.stats().num_signals, 2);
    }

    #[test]
    fn test_missing_file_is_load_error() {
        let err = parse_dbc_file(Path::new("does/not/exist.dbc")).unwrap_err();
        assert!(matches!(err, HarnessError::DatabaseLoad(_)));
    }
}
