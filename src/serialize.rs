use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::compiler::{CompileArtifacts, UpvalueDescriptor};
use crate::table::Table;
use crate::value::{
    as_bool, as_function, as_number, as_string, is_bool, is_function, is_number, is_string, Value,
};

const MAGIC: &[u8; 4] = b"MVMD";
const FORMAT_VERSION: u16 = 1;

/// One record per compiled function. Addresses are the live heap pointers,
/// stable for the duration of the run, which makes them usable as ids by
/// external tooling.
#[derive(Debug)]
pub struct Context {
    pub function_address: u64,
    // Empty for the top-level script.
    pub context_name: String,
    pub arity: u32,
    pub upvalue_count: u32,
    pub first_instruction_address: u64,
    pub instructions: BTreeMap<u64, InstructionEntry>,
    pub constants: BTreeMap<i32, ConstantValue>,
    pub upvalues: Vec<UpvalueDescriptor>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionEntry {
    Opcode(u8),
    Operand(u64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstantValue {
    Bool(bool),
    Num(f64),
    StringAddress(u64),
    FunctionAddress(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressAndHash {
    pub address: u64,
    pub hash: u32,
}

/// Everything external tooling needs to reconstruct the compiled program:
/// the per-function contexts plus the interned string table keyed by raw
/// bytes.
#[derive(Debug)]
pub struct VmData {
    pub contexts: Vec<Context>,
    pub strings_at_addresses: BTreeMap<String, AddressAndHash>,
}

fn classify_constant(value: &Value) -> Option<ConstantValue> {
    if is_bool(value) {
        Some(ConstantValue::Bool(as_bool(value)))
    } else if is_number(value) {
        Some(ConstantValue::Num(as_number(value)))
    } else if is_string(value) {
        Some(ConstantValue::StringAddress(as_string(value) as u64))
    } else if is_function(value) {
        Some(ConstantValue::FunctionAddress(as_function(value) as u64))
    } else {
        // Nothing else reaches a constant pool.
        None
    }
}

impl VmData {
    /// Snapshot the compiled program. Every byte of every chunk is
    /// classified as opcode or operand using the compiler's operand map.
    pub fn gather(artifacts: &CompileArtifacts, strings: &Table) -> VmData {
        let mut contexts = Vec::with_capacity(artifacts.functions.len());

        for &function in &artifacts.functions {
            let artifact = artifacts.per_function.get(&function);
            let chunk = unsafe { &(*function).chunk };
            let base = chunk.code.as_ptr() as u64;

            let mut instructions = BTreeMap::new();
            for (offset, &byte) in chunk.code.iter().enumerate() {
                let is_operand = artifact
                    .map(|a| a.operand_offsets.contains(&offset))
                    .unwrap_or(false);
                let entry = if is_operand {
                    InstructionEntry::Operand(byte as u64)
                } else {
                    InstructionEntry::Opcode(byte)
                };
                instructions.insert(base + offset as u64, entry);
            }

            let mut constants = BTreeMap::new();
            for (index, value) in chunk.constants.iter().enumerate() {
                if let Some(constant) = classify_constant(value) {
                    constants.insert(index as i32, constant);
                }
            }

            contexts.push(Context {
                function_address: function as u64,
                context_name: unsafe { (*function).name.clone() },
                arity: unsafe { (*function).arity } as u32,
                upvalue_count: unsafe { (*function).upvalue_count } as u32,
                first_instruction_address: if chunk.code.is_empty() { 0 } else { base },
                instructions,
                constants,
                upvalues: artifact.map(|a| a.upvalues.clone()).unwrap_or_default(),
            });
        }

        let mut strings_at_addresses = BTreeMap::new();
        for (key, _) in strings.iter() {
            let string = unsafe { &*key };
            strings_at_addresses.insert(
                string.content.clone(),
                AddressAndHash {
                    address: key as u64,
                    hash: string.hash,
                },
            );
        }

        VmData {
            contexts,
            strings_at_addresses,
        }
    }

    /// Deterministic binary encoding: contexts in creation order,
    /// instructions by ascending address, constants by index, strings by
    /// content.
    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(MAGIC)?;
        writer.write_u16::<LittleEndian>(FORMAT_VERSION)?;

        writer.write_u32::<LittleEndian>(self.contexts.len() as u32)?;
        for context in &self.contexts {
            writer.write_u64::<LittleEndian>(context.function_address)?;
            write_string(writer, &context.context_name)?;
            writer.write_u32::<LittleEndian>(context.arity)?;
            writer.write_u32::<LittleEndian>(context.upvalue_count)?;
            writer.write_u64::<LittleEndian>(context.first_instruction_address)?;

            writer.write_u32::<LittleEndian>(context.instructions.len() as u32)?;
            for (address, entry) in &context.instructions {
                writer.write_u64::<LittleEndian>(*address)?;
                match entry {
                    InstructionEntry::Opcode(opcode) => {
                        writer.write_u8(0)?;
                        writer.write_u8(*opcode)?;
                    }
                    InstructionEntry::Operand(value) => {
                        writer.write_u8(1)?;
                        writer.write_u64::<LittleEndian>(*value)?;
                    }
                }
            }

            writer.write_u32::<LittleEndian>(context.constants.len() as u32)?;
            for (index, constant) in &context.constants {
                writer.write_i32::<LittleEndian>(*index)?;
                match constant {
                    ConstantValue::Bool(value) => {
                        writer.write_u8(0)?;
                        writer.write_u8(*value as u8)?;
                    }
                    ConstantValue::Num(value) => {
                        writer.write_u8(1)?;
                        writer.write_f64::<LittleEndian>(*value)?;
                    }
                    ConstantValue::StringAddress(address) => {
                        writer.write_u8(2)?;
                        writer.write_u64::<LittleEndian>(*address)?;
                    }
                    ConstantValue::FunctionAddress(address) => {
                        writer.write_u8(3)?;
                        writer.write_u64::<LittleEndian>(*address)?;
                    }
                }
            }

            writer.write_u32::<LittleEndian>(context.upvalues.len() as u32)?;
            for upvalue in &context.upvalues {
                writer.write_u8(upvalue.index)?;
                writer.write_u8(upvalue.is_local as u8)?;
            }
        }

        writer.write_u32::<LittleEndian>(self.strings_at_addresses.len() as u32)?;
        for (content, entry) in &self.strings_at_addresses {
            write_string(writer, content)?;
            writer.write_u64::<LittleEndian>(entry.address)?;
            writer.write_u32::<LittleEndian>(entry.hash)?;
        }

        Ok(())
    }

    pub fn write_to_file(&self, path: &Path) -> io::Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        self.write(&mut writer)?;
        writer.flush()
    }
}

fn write_string<W: Write>(writer: &mut W, content: &str) -> io::Result<()> {
    writer.write_u32::<LittleEndian>(content.len() as u32)?;
    writer.write_all(content.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::OpCode;
    use crate::compiler::Parser;
    use crate::objects::object_manager::ObjectManager;
    use crate::table::Table;

    struct Compiled {
        artifacts: CompileArtifacts,
        strings: Table,
        // Keeps the heap pointers in the artifacts alive.
        _object_manager: ObjectManager,
    }

    fn compile(source: &str) -> Compiled {
        let mut object_manager = ObjectManager::new();
        let mut strings = Table::new();
        let mut parser = Parser::new(&mut object_manager, &mut strings);
        assert!(parser.compile(source).is_some());
        let artifacts = parser.take_artifacts();
        drop(parser);
        Compiled {
            artifacts,
            strings,
            _object_manager: object_manager,
        }
    }

    #[test]
    fn test_instruction_classification() {
        let compiled = compile("print 1 + 2;");
        let data = VmData::gather(&compiled.artifacts, &compiled.strings);

        assert_eq!(data.contexts.len(), 1);
        let context = &data.contexts[0];
        assert_eq!(context.context_name, "");
        assert_eq!(context.arity, 0);

        // CONSTANT 0 CONSTANT 1 ADD PRINT NIL RETURN
        let entries: Vec<InstructionEntry> = context.instructions.values().copied().collect();
        assert_eq!(
            entries,
            vec![
                InstructionEntry::Opcode(OpCode::Constant.to_byte()),
                InstructionEntry::Operand(0),
                InstructionEntry::Opcode(OpCode::Constant.to_byte()),
                InstructionEntry::Operand(1),
                InstructionEntry::Opcode(OpCode::Add.to_byte()),
                InstructionEntry::Opcode(OpCode::Print.to_byte()),
                InstructionEntry::Opcode(OpCode::Nil.to_byte()),
                InstructionEntry::Opcode(OpCode::Return.to_byte()),
            ]
        );

        // Instruction addresses are contiguous from the chunk base.
        let addresses: Vec<u64> = context.instructions.keys().copied().collect();
        assert_eq!(addresses[0], context.first_instruction_address);
        assert!(addresses.windows(2).all(|pair| pair[1] == pair[0] + 1));

        assert_eq!(context.constants[&0], ConstantValue::Num(1.0));
        assert_eq!(context.constants[&1], ConstantValue::Num(2.0));
    }

    #[test]
    fn test_function_constants_use_addresses() {
        let compiled = compile("fun add(a, b) { return a + b; }");
        let data = VmData::gather(&compiled.artifacts, &compiled.strings);

        assert_eq!(data.contexts.len(), 2);
        let script = &data.contexts[0];
        let function = &data.contexts[1];
        assert_eq!(function.context_name, "add");
        assert_eq!(function.arity, 2);

        // The script's constant pool refers to the nested function by its
        // stable address and to its name by string address.
        let mut found_function = false;
        let mut found_name = false;
        for constant in script.constants.values() {
            match constant {
                ConstantValue::FunctionAddress(address) => {
                    assert_eq!(*address, function.function_address);
                    found_function = true;
                }
                ConstantValue::StringAddress(address) => {
                    let named = data
                        .strings_at_addresses
                        .values()
                        .any(|entry| entry.address == *address);
                    assert!(named);
                    found_name = true;
                }
                _ => {}
            }
        }
        assert!(found_function);
        assert!(found_name);
    }

    #[test]
    fn test_upvalue_descriptors_serialized() {
        let compiled =
            compile("fun outer() { var x = 1; fun inner() { return x; } return inner; }");
        let data = VmData::gather(&compiled.artifacts, &compiled.strings);

        let inner = data
            .contexts
            .iter()
            .find(|context| context.context_name == "inner")
            .unwrap();
        assert_eq!(inner.upvalue_count, 1);
        assert_eq!(inner.upvalues.len(), 1);
        assert_eq!(inner.upvalues[0].index, 1);
        assert!(inner.upvalues[0].is_local);
    }

    #[test]
    fn test_encoding_is_byte_stable() {
        let compiled = compile("var greeting = \"hello\"; print greeting;");
        let data = VmData::gather(&compiled.artifacts, &compiled.strings);

        let mut first = Vec::new();
        let mut second = Vec::new();
        data.write(&mut first).unwrap();
        data.write(&mut second).unwrap();
        assert!(!first.is_empty());
        assert_eq!(first, second);

        // Re-gathering from the same live program is stable too.
        let regathered = VmData::gather(&compiled.artifacts, &compiled.strings);
        let mut third = Vec::new();
        regathered.write(&mut third).unwrap();
        assert_eq!(first, third);
    }

    #[test]
    fn test_strings_table_round_trip() {
        let compiled = compile("var a = \"interned\";");
        let data = VmData::gather(&compiled.artifacts, &compiled.strings);
        let entry = data.strings_at_addresses.get("interned").unwrap();
        assert_ne!(entry.address, 0);
        assert_eq!(
            entry.hash,
            crate::objects::object_string::hash_string("interned")
        );
    }
}
