use crate::chunk::{Chunk, OpCode};
use crate::value::{as_function, format_value, is_function};

pub fn disassemble_chunk(chunk: &Chunk, name: &str) {
    println!("== {} ==", name);

    let mut offset = 0;
    while offset < chunk.len() {
        offset = disassemble_instruction(chunk, offset);
    }
}

pub fn disassemble_instruction(chunk: &Chunk, offset: usize) -> usize {
    print!("{:04} ", offset);
    if offset > 0 && chunk.lines[offset] == chunk.lines[offset - 1] {
        print!("   | ");
    } else {
        print!("{:4} ", chunk.lines[offset]);
    }

    let byte = chunk.code[offset];
    let instruction = match OpCode::from_byte(byte) {
        Some(instruction) => instruction,
        None => {
            println!("Unknown opcode {}", byte);
            return offset + 1;
        }
    };

    match instruction {
        OpCode::Constant
        | OpCode::GetGlobal
        | OpCode::DefineGlobal
        | OpCode::SetGlobal
        | OpCode::GetProperty
        | OpCode::SetProperty
        | OpCode::GetSuper
        | OpCode::Class
        | OpCode::Method => constant_instruction(instruction, chunk, offset),
        OpCode::GetLocal
        | OpCode::SetLocal
        | OpCode::GetUpvalue
        | OpCode::SetUpvalue
        | OpCode::Call => byte_instruction(instruction, chunk, offset),
        OpCode::Jump | OpCode::JumpIfFalse => jump_instruction(instruction, 1, chunk, offset),
        OpCode::Loop => jump_instruction(instruction, -1, chunk, offset),
        OpCode::Invoke | OpCode::SuperInvoke => invoke_instruction(instruction, chunk, offset),
        OpCode::Closure => closure_instruction(chunk, offset),
        _ => simple_instruction(instruction, offset),
    }
}

fn opcode_name(instruction: OpCode) -> String {
    format!("OP_{}", instruction)
}

fn simple_instruction(instruction: OpCode, offset: usize) -> usize {
    println!("{}", opcode_name(instruction));
    offset + 1
}

fn constant_instruction(instruction: OpCode, chunk: &Chunk, offset: usize) -> usize {
    let constant = chunk.code[offset + 1] as usize;
    println!(
        "{:<16} {:>4} '{}'",
        opcode_name(instruction),
        constant,
        format_value(chunk.get_constant(constant))
    );
    offset + 2
}

fn byte_instruction(instruction: OpCode, chunk: &Chunk, offset: usize) -> usize {
    let slot = chunk.code[offset + 1];
    println!("{:<16} {:>4}", opcode_name(instruction), slot);
    offset + 2
}

fn jump_instruction(instruction: OpCode, sign: i64, chunk: &Chunk, offset: usize) -> usize {
    // High byte first.
    let jump = ((chunk.code[offset + 1] as i64) << 8) | chunk.code[offset + 2] as i64;
    let target = offset as i64 + 3 + sign * jump;
    println!(
        "{:<16} {:>4} -> {}",
        opcode_name(instruction),
        offset,
        target
    );
    offset + 3
}

fn invoke_instruction(instruction: OpCode, chunk: &Chunk, offset: usize) -> usize {
    let constant = chunk.code[offset + 1] as usize;
    let argument_count = chunk.code[offset + 2];
    println!(
        "{:<16} ({} args) {:>4} '{}'",
        opcode_name(instruction),
        argument_count,
        constant,
        format_value(chunk.get_constant(constant))
    );
    offset + 3
}

fn closure_instruction(chunk: &Chunk, offset: usize) -> usize {
    let mut offset = offset + 1;
    let constant = chunk.code[offset] as usize;
    offset += 1;
    let value = chunk.get_constant(constant);
    println!(
        "{:<16} {:>4} {}",
        opcode_name(OpCode::Closure),
        constant,
        format_value(value)
    );

    if is_function(value) {
        let upvalue_count = unsafe { (*as_function(value)).upvalue_count } as usize;
        for _ in 0..upvalue_count {
            let is_local = chunk.code[offset] != 0;
            let index = chunk.code[offset + 1];
            println!(
                "{:04}    |                     {} {}",
                offset,
                if is_local { "local" } else { "upvalue" },
                index
            );
            offset += 2;
        }
    }

    offset
}
