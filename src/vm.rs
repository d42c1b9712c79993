use std::path::{Path, PathBuf};

use crate::call_frame::CallFrame;
use crate::chunk::OpCode;
use crate::compiler::Parser;
use crate::gc::{GarbageCollector, GC_STRESS};
use crate::objects::object::{Object, ObjectType};
use crate::objects::object_class::ObjectClass;
use crate::objects::object_closure::ObjectClosure;
use crate::objects::object_manager::ObjectManager;
use crate::objects::object_string::ObjectString;
use crate::objects::object_upvalue::ObjectUpvalue;
use crate::serialize::VmData;
use crate::std_mod::time::ClockTime;
use crate::table::Table;
use crate::value::{
    as_bound_method, as_class, as_closure, as_function, as_instance, as_native_function,
    as_number, as_object, as_string, intern_string, is_class, is_falsey, is_instance, is_number,
    is_object, is_string, make_bool_value, make_nil_value, make_number_value, make_object_value,
    make_string_value, print_value, Value,
};

pub const FRAMES_MAX: usize = 64;
pub const STACK_MAX: usize = FRAMES_MAX * 256;

const FIRST_GC_THRESHOLD: usize = 1024 * 1024;

pub struct VM {
    frames: Vec<CallFrame>,
    // Fixed length for the whole run; upvalues keep raw pointers into it.
    stack: Vec<Value>,
    stack_top_pos: usize,
    globals: Table,
    intern_strings: Table,
    // Sorted by strictly descending stack location.
    open_upvalues: Vec<*mut ObjectUpvalue>,
    object_manager: ObjectManager,
    gc: GarbageCollector,
    bytes_allocated: usize,
    next_gc: usize,
    init_string: *mut ObjectString,
    // Pins compiled functions across the compile -> serialize -> bootstrap
    // window; empty while user code runs.
    compiler_roots: Vec<*mut Object>,
    artifact_path: PathBuf,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum InterpretResult {
    InterpretOk,
    InterpretCompileError,
    InterpretRuntimeError,
}

impl VM {
    pub fn new() -> Box<VM> {
        let mut vm = Box::new(VM {
            frames: Vec::with_capacity(FRAMES_MAX),
            stack: vec![Value::new(); STACK_MAX],
            stack_top_pos: 0,
            globals: Table::new(),
            intern_strings: Table::new(),
            open_upvalues: vec![],
            object_manager: ObjectManager::new(),
            gc: GarbageCollector::new(),
            bytes_allocated: 0,
            next_gc: FIRST_GC_THRESHOLD,
            init_string: std::ptr::null_mut(),
            compiler_roots: vec![],
            artifact_path: PathBuf::from("VMDataFile.txt"),
        });

        // The constructor lookup key; kept alive as a GC root.
        vm.init_string = intern_string(&mut vm.object_manager, &mut vm.intern_strings, "init");
        vm.define_native("clock", 0, ClockTime::new());
        vm
    }

    pub fn set_artifact_path(&mut self, path: &Path) {
        self.artifact_path = path.to_path_buf();
    }

    pub fn interpret(&mut self, source: &str) -> InterpretResult {
        let (function, artifacts) = {
            let mut parser = Parser::new(&mut self.object_manager, &mut self.intern_strings);
            let function = parser.compile(source);
            let artifacts = parser.take_artifacts();
            (function, artifacts)
        };

        let function = match function {
            Some(function) => function,
            None => return InterpretResult::InterpretCompileError,
        };

        self.compiler_roots = artifacts
            .functions
            .iter()
            .map(|&function| function as *mut Object)
            .collect();

        // Snapshot the compiled program before anything executes.
        let vm_data = VmData::gather(&artifacts, &self.intern_strings);
        if let Err(error) = vm_data.write_to_file(&self.artifact_path) {
            eprintln!(
                "Failed to write vm data to {}: {}",
                self.artifact_path.display(),
                error
            );
            self.compiler_roots.clear();
            return InterpretResult::InterpretCompileError;
        }

        // Keep the function reachable while its closure is allocated.
        self.push(make_object_value(function as *mut Object));
        self.maybe_collect();
        let (closure, _) = self.object_manager.alloc_closure(function);
        self.pop();
        self.push(make_object_value(closure as *mut Object));
        self.compiler_roots.clear();
        self.call_closure(closure, 0);

        self.run()
    }

    fn define_native(
        &mut self,
        name: &str,
        arity: u16,
        native: impl crate::objects::object::NativeObject + 'static,
    ) {
        let name_string = intern_string(&mut self.object_manager, &mut self.intern_strings, name);
        let (native_function, _) =
            self.object_manager
                .alloc_native_function(name.to_string(), arity, native);
        self.globals.set(
            name_string,
            make_object_value(native_function as *mut Object),
        );
    }

    fn push(&mut self, value: Value) {
        assert!(self.stack_top_pos < STACK_MAX, "Value stack overflow.");
        self.stack[self.stack_top_pos] = value;
        self.stack_top_pos += 1;
    }

    fn pop(&mut self) -> Value {
        debug_assert!(self.stack_top_pos > 0, "Value stack underflow.");
        self.stack_top_pos -= 1;
        self.stack[self.stack_top_pos]
    }

    fn peek(&self, distance: usize) -> &Value {
        &self.stack[self.stack_top_pos - distance - 1]
    }

    fn read_byte(&mut self) -> u8 {
        let frame = self.frames.last_mut().expect("No call frame.");
        let byte = unsafe { (&(*(*frame.closure).function).chunk.code)[frame.ip] };
        frame.ip += 1;
        byte
    }

    /// Jump operands are stored high byte first.
    fn read_short(&mut self) -> u16 {
        let high = self.read_byte() as u16;
        let low = self.read_byte() as u16;
        (high << 8) | low
    }

    fn read_constant(&mut self) -> Value {
        let index = self.read_byte() as usize;
        let frame = self.frames.last().expect("No call frame.");
        unsafe { (&(*(*frame.closure).function).chunk.constants)[index] }
    }

    fn read_string_constant(&mut self) -> *mut ObjectString {
        let constant = self.read_constant();
        as_string(&constant)
    }

    fn run(&mut self) -> InterpretResult {
        loop {
            debug_feature::trace_instruction(self);

            let byte = self.read_byte();
            let instruction = match OpCode::from_byte(byte) {
                Some(instruction) => instruction,
                None => {
                    self.runtime_error(&format!("Unknown opcode {}.", byte));
                    return InterpretResult::InterpretRuntimeError;
                }
            };

            match instruction {
                OpCode::Constant => {
                    let constant = self.read_constant();
                    self.push(constant);
                }
                OpCode::Nil => self.push(make_nil_value()),
                OpCode::True => self.push(make_bool_value(true)),
                OpCode::False => self.push(make_bool_value(false)),
                OpCode::Pop => {
                    self.pop();
                }
                OpCode::GetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frames.last().expect("No call frame.").slots_offset;
                    let value = self.stack[base + slot];
                    self.push(value);
                }
                OpCode::SetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frames.last().expect("No call frame.").slots_offset;
                    self.stack[base + slot] = *self.peek(0);
                }
                OpCode::GetGlobal => {
                    let name = self.read_string_constant();
                    match self.globals.get(name) {
                        Some(value) => self.push(value),
                        None => {
                            let content = unsafe { (*name).content.clone() };
                            self.runtime_error(&format!("Undefined variable '{}'.", content));
                            return InterpretResult::InterpretRuntimeError;
                        }
                    }
                }
                OpCode::DefineGlobal => {
                    let name = self.read_string_constant();
                    let value = *self.peek(0);
                    self.globals.set(name, value);
                    self.pop();
                }
                OpCode::SetGlobal => {
                    let name = self.read_string_constant();
                    let value = *self.peek(0);
                    if self.globals.set(name, value) {
                        // Assignment never creates a global.
                        self.globals.delete(name);
                        let content = unsafe { (*name).content.clone() };
                        self.runtime_error(&format!("Undefined variable '{}'.", content));
                        return InterpretResult::InterpretRuntimeError;
                    }
                }
                OpCode::GetUpvalue => {
                    let index = self.read_byte() as usize;
                    let frame = self.frames.last().expect("No call frame.");
                    let upvalue = unsafe { (&(*frame.closure).upvalues)[index] };
                    let value = unsafe { *(*upvalue).location };
                    self.push(value);
                }
                OpCode::SetUpvalue => {
                    let index = self.read_byte() as usize;
                    let value = *self.peek(0);
                    let frame = self.frames.last().expect("No call frame.");
                    let upvalue = unsafe { (&(*frame.closure).upvalues)[index] };
                    unsafe {
                        *(*upvalue).location = value;
                    }
                }
                OpCode::GetProperty => {
                    let name = self.read_string_constant();
                    let receiver = *self.peek(0);
                    if !is_instance(&receiver) {
                        self.runtime_error("Only instances have properties.");
                        return InterpretResult::InterpretRuntimeError;
                    }

                    let instance = as_instance(&receiver);
                    if let Some(value) = unsafe { (*instance).fields.get(name) } {
                        self.pop();
                        self.push(value);
                    } else if !self.bind_method(unsafe { (*instance).class }, name) {
                        return InterpretResult::InterpretRuntimeError;
                    }
                }
                OpCode::SetProperty => {
                    let name = self.read_string_constant();
                    let receiver = *self.peek(1);
                    if !is_instance(&receiver) {
                        self.runtime_error("Only instances have fields.");
                        return InterpretResult::InterpretRuntimeError;
                    }

                    let value = *self.peek(0);
                    unsafe {
                        (*as_instance(&receiver)).fields.set(name, value);
                    }
                    // The assigned value is the expression result.
                    let value = self.pop();
                    self.pop();
                    self.push(value);
                }
                OpCode::GetSuper => {
                    let name = self.read_string_constant();
                    let superclass = as_class(&self.pop());
                    if !self.bind_method(superclass, name) {
                        return InterpretResult::InterpretRuntimeError;
                    }
                }
                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(make_bool_value(a == b));
                }
                OpCode::Greater => {
                    if !self.binary_op(OpCode::Greater) {
                        return InterpretResult::InterpretRuntimeError;
                    }
                }
                OpCode::Less => {
                    if !self.binary_op(OpCode::Less) {
                        return InterpretResult::InterpretRuntimeError;
                    }
                }
                OpCode::Add => {
                    let b = *self.peek(0);
                    let a = *self.peek(1);
                    if is_string(&a) && is_string(&b) {
                        self.concatenate();
                    } else if is_number(&a) && is_number(&b) {
                        self.pop();
                        self.pop();
                        self.push(make_number_value(as_number(&a) + as_number(&b)));
                    } else {
                        self.runtime_error("Operands must be two numbers or two strings.");
                        return InterpretResult::InterpretRuntimeError;
                    }
                }
                OpCode::Subtract => {
                    if !self.binary_op(OpCode::Subtract) {
                        return InterpretResult::InterpretRuntimeError;
                    }
                }
                OpCode::Multiply => {
                    if !self.binary_op(OpCode::Multiply) {
                        return InterpretResult::InterpretRuntimeError;
                    }
                }
                OpCode::Divide => {
                    if !self.binary_op(OpCode::Divide) {
                        return InterpretResult::InterpretRuntimeError;
                    }
                }
                OpCode::Not => {
                    let value = self.pop();
                    self.push(make_bool_value(is_falsey(&value)));
                }
                OpCode::Negate => {
                    if !is_number(self.peek(0)) {
                        self.runtime_error("Operand must be a number.");
                        return InterpretResult::InterpretRuntimeError;
                    }
                    let value = self.pop();
                    self.push(make_number_value(-as_number(&value)));
                }
                OpCode::Print => {
                    let value = self.pop();
                    print_value(&value);
                    println!();
                }
                OpCode::Jump => {
                    let offset = self.read_short() as usize;
                    self.frames.last_mut().expect("No call frame.").ip += offset;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_short() as usize;
                    if is_falsey(self.peek(0)) {
                        self.frames.last_mut().expect("No call frame.").ip += offset;
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_short() as usize;
                    self.frames.last_mut().expect("No call frame.").ip -= offset;
                }
                OpCode::Call => {
                    let argument_count = self.read_byte() as usize;
                    let callee = *self.peek(argument_count);
                    if !self.call_value(callee, argument_count) {
                        return InterpretResult::InterpretRuntimeError;
                    }
                }
                OpCode::Invoke => {
                    let name = self.read_string_constant();
                    let argument_count = self.read_byte() as usize;
                    if !self.invoke(name, argument_count) {
                        return InterpretResult::InterpretRuntimeError;
                    }
                }
                OpCode::SuperInvoke => {
                    let name = self.read_string_constant();
                    let argument_count = self.read_byte() as usize;
                    let superclass = as_class(&self.pop());
                    if !self.invoke_from_class(superclass, name, argument_count) {
                        return InterpretResult::InterpretRuntimeError;
                    }
                }
                OpCode::Closure => {
                    let constant = self.read_constant();
                    let function = as_function(&constant);
                    self.maybe_collect();
                    let (closure, _) = self.object_manager.alloc_closure(function);
                    self.push(make_object_value(closure as *mut Object));

                    let upvalue_count = unsafe { (*function).upvalue_count } as usize;
                    for _ in 0..upvalue_count {
                        let is_local = self.read_byte() != 0;
                        let index = self.read_byte() as usize;
                        let upvalue = if is_local {
                            let base =
                                self.frames.last().expect("No call frame.").slots_offset;
                            self.capture_upvalue(base + index)
                        } else {
                            let frame = self.frames.last().expect("No call frame.");
                            unsafe { (&(*frame.closure).upvalues)[index] }
                        };
                        unsafe {
                            (*closure).upvalues.push(upvalue);
                        }
                    }
                }
                OpCode::CloseUpvalue => {
                    self.close_upvalues(self.stack_top_pos - 1);
                    self.pop();
                }
                OpCode::Return => {
                    let result = self.pop();
                    let frame = self.frames.pop().expect("No call frame.");
                    self.close_upvalues(frame.slots_offset);

                    if self.frames.is_empty() {
                        // The script closure itself.
                        self.pop();
                        return InterpretResult::InterpretOk;
                    }

                    self.stack_top_pos = frame.slots_offset;
                    self.push(result);
                }
                OpCode::Class => {
                    let name = self.read_string_constant();
                    let class_name = unsafe { (*name).content.clone() };
                    self.maybe_collect();
                    let (class, _) = self.object_manager.alloc_class(class_name);
                    self.push(make_object_value(class as *mut Object));
                }
                OpCode::Inherit => {
                    let superclass = *self.peek(1);
                    if !is_class(&superclass) {
                        self.runtime_error("Superclass must be a class.");
                        return InterpretResult::InterpretRuntimeError;
                    }

                    // Copy-down inheritance: the subclass snapshots every
                    // inherited method; later METHODs may override.
                    let subclass = as_class(self.peek(0));
                    unsafe {
                        let superclass = as_class(&superclass);
                        (*subclass).methods.add_all(&(*superclass).methods);
                    }
                    self.pop();
                }
                OpCode::Method => {
                    let name = self.read_string_constant();
                    let method = *self.peek(0);
                    let class = as_class(self.peek(1));
                    unsafe {
                        (*class).methods.set(name, method);
                    }
                    self.pop();
                }
            }
        }
    }

    fn binary_op(&mut self, opcode: OpCode) -> bool {
        if !is_number(self.peek(0)) || !is_number(self.peek(1)) {
            self.runtime_error("Operands must be numbers.");
            return false;
        }

        let b = as_number(&self.pop());
        let a = as_number(&self.pop());
        match opcode {
            OpCode::Greater => self.push(make_bool_value(a > b)),
            OpCode::Less => self.push(make_bool_value(a < b)),
            OpCode::Subtract => self.push(make_number_value(a - b)),
            OpCode::Multiply => self.push(make_number_value(a * b)),
            OpCode::Divide => self.push(make_number_value(a / b)),
            _ => unreachable!("Unexpected binary operator: {}", opcode),
        }
        true
    }

    /// Both operands stay on the stack until the result exists, so a
    /// collection triggered by the allocation sees them as roots.
    fn concatenate(&mut self) {
        let b = as_string(self.peek(0));
        let a = as_string(self.peek(1));
        let combined = unsafe { format!("{}{}", (*a).content, (*b).content) };

        self.maybe_collect();
        let value = make_string_value(&mut self.object_manager, &mut self.intern_strings, &combined);
        self.pop();
        self.pop();
        self.push(value);
    }

    fn call_value(&mut self, callee: Value, argument_count: usize) -> bool {
        if is_object(&callee) {
            match unsafe { (*as_object(&callee)).obj_type } {
                ObjectType::ObjBoundMethod => {
                    let bound = as_bound_method(&callee);
                    let receiver_slot = self.stack_top_pos - argument_count - 1;
                    self.stack[receiver_slot] = unsafe { (*bound).receiver };
                    return self.call_closure(unsafe { (*bound).method }, argument_count);
                }
                ObjectType::ObjClass => {
                    let class = as_class(&callee);
                    self.maybe_collect();
                    let (instance, _) = self.object_manager.alloc_instance(class);
                    let callee_slot = self.stack_top_pos - argument_count - 1;
                    self.stack[callee_slot] = make_object_value(instance as *mut Object);

                    let initializer = unsafe { (*class).methods.get(self.init_string) };
                    if let Some(initializer) = initializer {
                        return self.call_closure(as_closure(&initializer), argument_count);
                    }
                    if argument_count != 0 {
                        self.runtime_error(&format!(
                            "Expected 0 arguments but got {}.",
                            argument_count
                        ));
                        return false;
                    }
                    return true;
                }
                ObjectType::ObjClosure => {
                    return self.call_closure(as_closure(&callee), argument_count)
                }
                ObjectType::ObjNativeFunction => {
                    let native = as_native_function(&callee);
                    let arguments_start = self.stack_top_pos - argument_count;
                    let result = unsafe {
                        (*native).invoke(&self.stack[arguments_start..self.stack_top_pos])
                    };
                    return match result {
                        Ok(value) => {
                            self.stack_top_pos -= argument_count + 1;
                            self.push(value);
                            true
                        }
                        Err(message) => {
                            self.runtime_error(&message);
                            false
                        }
                    };
                }
                _ => {}
            }
        }

        self.runtime_error("Can only call functions and classes.");
        false
    }

    fn call_closure(&mut self, closure: *mut ObjectClosure, argument_count: usize) -> bool {
        let arity = unsafe { (*(*closure).function).arity } as usize;
        if argument_count != arity {
            self.runtime_error(&format!(
                "Expected {} arguments but got {}.",
                arity, argument_count
            ));
            return false;
        }

        if self.frames.len() == FRAMES_MAX {
            self.runtime_error("Stack overflow.");
            return false;
        }

        let slots_offset = self.stack_top_pos - argument_count - 1;
        self.frames.push(CallFrame::new(closure, slots_offset));
        true
    }

    fn invoke(&mut self, name: *mut ObjectString, argument_count: usize) -> bool {
        let receiver = *self.peek(argument_count);
        if !is_instance(&receiver) {
            self.runtime_error("Only instances have methods.");
            return false;
        }

        let instance = as_instance(&receiver);

        // A field shadowing the method name wins and is called as a value.
        if let Some(field) = unsafe { (*instance).fields.get(name) } {
            let callee_slot = self.stack_top_pos - argument_count - 1;
            self.stack[callee_slot] = field;
            return self.call_value(field, argument_count);
        }

        self.invoke_from_class(unsafe { (*instance).class }, name, argument_count)
    }

    fn invoke_from_class(
        &mut self,
        class: *mut ObjectClass,
        name: *mut ObjectString,
        argument_count: usize,
    ) -> bool {
        match unsafe { (*class).methods.get(name) } {
            Some(method) => self.call_closure(as_closure(&method), argument_count),
            None => {
                let content = unsafe { (*name).content.clone() };
                self.runtime_error(&format!("Undefined property '{}'.", content));
                false
            }
        }
    }

    fn bind_method(&mut self, class: *mut ObjectClass, name: *mut ObjectString) -> bool {
        let method = unsafe { (*class).methods.get(name) };
        let method = match method {
            Some(method) => method,
            None => {
                let content = unsafe { (*name).content.clone() };
                self.runtime_error(&format!("Undefined property '{}'.", content));
                return false;
            }
        };

        let receiver = *self.peek(0);
        self.maybe_collect();
        let (bound, _) = self
            .object_manager
            .alloc_bound_method(receiver, as_closure(&method));
        self.pop();
        self.push(make_object_value(bound as *mut Object));
        true
    }

    fn capture_upvalue(&mut self, stack_index: usize) -> *mut ObjectUpvalue {
        let local = &mut self.stack[stack_index] as *mut Value;

        let mut insert_at = self.open_upvalues.len();
        for (index, &upvalue) in self.open_upvalues.iter().enumerate() {
            let location = unsafe { (*upvalue).location };
            if std::ptr::eq(location, local) {
                return upvalue;
            }
            if (location as usize) < (local as usize) {
                insert_at = index;
                break;
            }
        }

        self.maybe_collect();
        let (upvalue, _) = self.object_manager.alloc_upvalue(local);
        self.open_upvalues.insert(insert_at, upvalue);
        upvalue
    }

    /// Promote every open upvalue at or above the given stack slot.
    fn close_upvalues(&mut self, last_index: usize) {
        let last = &self.stack[last_index] as *const Value;
        loop {
            let upvalue = match self.open_upvalues.first() {
                Some(&upvalue) => upvalue,
                None => break,
            };

            let location = unsafe { (*upvalue).location };
            if (location as usize) < (last as usize) {
                break;
            }

            unsafe {
                (*upvalue).close();
            }
            self.open_upvalues.remove(0);
        }
    }

    fn maybe_collect(&mut self) {
        self.bytes_allocated += self.object_manager.drain_pending_bytes();
        if *GC_STRESS || self.bytes_allocated > self.next_gc {
            self.collect_garbage();
        }
    }

    fn collect_garbage(&mut self) {
        let before = self.bytes_allocated;

        self.gc.prepare_collection(&self.object_manager);
        self.gc.mark_roots(
            &self.stack,
            self.stack_top_pos,
            &self.globals,
            &self.frames,
            &self.open_upvalues,
            &self.compiler_roots,
            self.init_string,
        );
        self.gc.trace_references();
        self.gc.remove_white_strings(&mut self.intern_strings);
        let freed = self.gc.sweep(&mut self.object_manager);

        self.bytes_allocated = self.bytes_allocated.saturating_sub(freed);
        self.next_gc = self.bytes_allocated * 2;
        self.gc
            .record_cycle(before, freed, self.bytes_allocated, self.next_gc);
    }

    fn runtime_error(&mut self, message: &str) {
        eprintln!("{}", message);

        for frame in self.frames.iter().rev() {
            let function = frame.function();
            let line = frame.current_line();
            if function.name.is_empty() {
                eprintln!("[line {}] in script", line);
            } else {
                eprintln!("[line {}] in {}()", line, function.name);
            }
        }

        self.reset_stack();
    }

    fn reset_stack(&mut self) {
        self.stack_top_pos = 0;
        self.frames.clear();
        self.open_upvalues.clear();
    }
}

#[cfg(feature = "debug_trace_execution")]
mod debug_feature {
    use super::*;
    use crate::debug;
    use crate::value::format_value;

    pub fn trace_instruction(vm: &VM) {
        print!("          ");
        for slot in &vm.stack[0..vm.stack_top_pos] {
            print!("[ {} ]", format_value(slot));
        }
        println!();
        if let Some(frame) = vm.frames.last() {
            debug::disassemble_instruction(frame.chunk(), frame.ip);
        }
    }
}

#[cfg(not(feature = "debug_trace_execution"))]
mod debug_feature {
    use super::*;

    pub fn trace_instruction(_vm: &VM) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_vm(name: &str) -> Box<VM> {
        let mut vm = VM::new();
        let path = std::env::temp_dir().join(format!("mocha-vmdata-{}-{}", std::process::id(), name));
        vm.set_artifact_path(&path);
        vm
    }

    #[test]
    fn test_arithmetic_and_comparisons() {
        let mut vm = test_vm("arithmetic");
        assert_eq!(
            vm.interpret("print !(5 - 4 > 3 * 2 == !nil);"),
            InterpretResult::InterpretOk
        );
        assert_eq!(vm.stack_top_pos, 0);
    }

    #[test]
    fn test_compile_error_result() {
        let mut vm = test_vm("compile-error");
        assert_eq!(
            vm.interpret("print 1 +;"),
            InterpretResult::InterpretCompileError
        );
    }

    #[test]
    fn test_type_error_result() {
        let mut vm = test_vm("type-error");
        assert_eq!(
            vm.interpret("print 1 + \"x\";"),
            InterpretResult::InterpretRuntimeError
        );
        // The stack is reset after a runtime error.
        assert_eq!(vm.stack_top_pos, 0);
    }

    #[test]
    fn test_undefined_variable() {
        let mut vm = test_vm("undefined");
        assert_eq!(
            vm.interpret("print missing;"),
            InterpretResult::InterpretRuntimeError
        );
        assert_eq!(
            vm.interpret("missing = 1;"),
            InterpretResult::InterpretRuntimeError
        );
    }

    #[test]
    fn test_uncallable_callee() {
        let mut vm = test_vm("uncallable");
        assert_eq!(
            vm.interpret("var a; a();"),
            InterpretResult::InterpretRuntimeError
        );
    }

    #[test]
    fn test_globals_persist_across_interprets() {
        let mut vm = test_vm("repl-globals");
        assert_eq!(vm.interpret("var a = 41;"), InterpretResult::InterpretOk);
        assert_eq!(
            vm.interpret("print a + 1;"),
            InterpretResult::InterpretOk
        );
    }

    #[test]
    fn test_functions_and_recursion() {
        let mut vm = test_vm("fib");
        let source = "fun fib(n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); } \
                      var result = fib(10);";
        assert_eq!(vm.interpret(source), InterpretResult::InterpretOk);
        assert_eq!(
            vm.interpret("if (result == 55) { var ok = 1; } else { missing; }"),
            InterpretResult::InterpretOk
        );
    }

    #[test]
    fn test_closures_capture_and_mutate() {
        let mut vm = test_vm("counter");
        let source = "fun makeCounter() { var i = 0; fun count() { i = i + 1; return i; } \
                      return count; } \
                      var counter = makeCounter(); \
                      var first = counter(); \
                      var second = counter();";
        assert_eq!(vm.interpret(source), InterpretResult::InterpretOk);
        assert_eq!(
            vm.interpret("if (first == 1 and second == 2) { } else { missing; }"),
            InterpretResult::InterpretOk
        );
    }

    #[test]
    fn test_classes_methods_and_inheritance() {
        let mut vm = test_vm("classes");
        let source = "class A { init(x) { this.x = x; } double() { return this.x * 2; } } \
                      class B < A { init(x) { super.init(x); this.y = this.x + 1; } } \
                      var b = B(10); \
                      var doubled = b.double();";
        assert_eq!(vm.interpret(source), InterpretResult::InterpretOk);
        assert_eq!(
            vm.interpret("if (b.x == 10 and b.y == 11 and doubled == 20) { } else { missing; }"),
            InterpretResult::InterpretOk
        );
    }

    #[test]
    fn test_bound_methods_are_first_class() {
        let mut vm = test_vm("bound");
        let source = "class A { init() { this.x = 1; } get() { return this.x; } } \
                      var bound = A().get; \
                      var got = bound();";
        assert_eq!(vm.interpret(source), InterpretResult::InterpretOk);
        assert_eq!(
            vm.interpret("if (got == 1) { } else { missing; }"),
            InterpretResult::InterpretOk
        );
    }

    #[test]
    fn test_superclass_must_be_class() {
        let mut vm = test_vm("superclass");
        assert_eq!(
            vm.interpret("var NotAClass = 1; class B < NotAClass {}"),
            InterpretResult::InterpretRuntimeError
        );
    }

    #[test]
    fn test_arity_mismatch() {
        let mut vm = test_vm("arity");
        assert_eq!(
            vm.interpret("fun f(a, b) {} f(1);"),
            InterpretResult::InterpretRuntimeError
        );
    }

    #[test]
    fn test_deep_recursion_overflows_frames() {
        let mut vm = test_vm("overflow");
        assert_eq!(
            vm.interpret("fun loop() { loop(); } loop();"),
            InterpretResult::InterpretRuntimeError
        );
    }

    #[test]
    fn test_clock_native() {
        let mut vm = test_vm("clock");
        assert_eq!(
            vm.interpret("var t = clock(); if (t > 0) { } else { missing; }"),
            InterpretResult::InterpretOk
        );
    }

    #[test]
    fn test_heap_is_empty_after_teardown() {
        let mut vm = test_vm("teardown");
        assert_eq!(
            vm.interpret("var s = \"alive\" + \"!\";"),
            InterpretResult::InterpretOk
        );
        assert!(vm.object_manager.object_count() > 0);
        unsafe {
            vm.object_manager.free_all();
        }
        assert_eq!(vm.object_manager.object_count(), 0);
    }

    #[test]
    fn test_open_upvalues_stay_sorted() {
        let mut vm = test_vm("upvalue-order");
        // Two live closures over different frames force multiple opens.
        let source = "fun outer() { var a = 1; var b = 2; \
                      fun both() { return a + b; } return both; } \
                      var f = outer(); var x = f();";
        assert_eq!(vm.interpret(source), InterpretResult::InterpretOk);
        assert!(vm
            .open_upvalues
            .windows(2)
            .all(|pair| unsafe { ((*pair[0]).location as usize) > ((*pair[1]).location as usize) }));
    }

    #[test]
    fn test_artifact_file_is_written() {
        let mut vm = VM::new();
        let path = std::env::temp_dir().join(format!("mocha-artifact-{}", std::process::id()));
        vm.set_artifact_path(&path);
        assert_eq!(vm.interpret("print 1;"), InterpretResult::InterpretOk);
        let metadata = std::fs::metadata(&path).expect("artifact written");
        assert!(metadata.len() > 0);
        let _ = std::fs::remove_file(&path);
    }
}
