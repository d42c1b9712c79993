use std::collections::HashSet;

use once_cell::sync::Lazy;

use crate::call_frame::CallFrame;
use crate::objects::{
    object::{Object, ObjectType},
    object_manager::{free_object, ObjectManager},
    object_string::ObjectString,
    object_upvalue::ObjectUpvalue,
};
use crate::table::Table;
use crate::value::{as_mutable_object, is_object, Value};

/// Collection on every allocation checkpoint.
pub static GC_STRESS: Lazy<bool> =
    Lazy::new(|| std::env::var_os("MOCHA_GC_STRESS").is_some());

/// Per-cycle summaries on stderr.
pub static GC_LOG: Lazy<bool> = Lazy::new(|| std::env::var_os("MOCHA_GC_LOG").is_some());

// Detailed tracing, only with the gc_debug feature.
#[cfg(feature = "gc_debug")]
macro_rules! gc_trace {
    ($($arg:tt)*) => { eprintln!("[gc-trace] {}", format_args!($($arg)*)); }
}
#[cfg(not(feature = "gc_debug"))]
macro_rules! gc_trace {
    ($($arg:tt)*) => {};
}

/// Tri-color mark-and-sweep: white = unreached, gray = reached but not yet
/// scanned, black = fully scanned. Objects migrate white → gray → black
/// during a cycle; whatever stays white is garbage.
pub struct GarbageCollector {
    white_set: HashSet<*mut Object>,
    gray_set: HashSet<*mut Object>,
    black_set: HashSet<*mut Object>,
    stats: GCStats,
}

/// Aggregated statistics; the VM owns the live byte counter.
#[derive(Default, Debug, Clone)]
pub struct GCStats {
    pub cycles: u64,
    pub total_freed_bytes: usize,
    pub last_freed_bytes: usize,
    pub last_before_bytes: usize,
    pub last_after_bytes: usize,
    pub last_next_trigger_bytes: usize,
}

impl GCStats {
    fn record(&mut self, before: usize, freed: usize, after: usize, next_trigger: usize) {
        self.cycles += 1;
        self.total_freed_bytes += freed;
        self.last_freed_bytes = freed;
        self.last_before_bytes = before;
        self.last_after_bytes = after;
        self.last_next_trigger_bytes = next_trigger;
    }
}

impl GarbageCollector {
    pub fn new() -> GarbageCollector {
        GarbageCollector {
            white_set: HashSet::new(),
            gray_set: HashSet::new(),
            black_set: HashSet::new(),
            stats: GCStats::default(),
        }
    }

    /// Start a cycle with every heap object white.
    pub fn prepare_collection(&mut self, object_manager: &ObjectManager) {
        self.reset();
        for &object in object_manager.iter() {
            self.white_set.insert(object);
        }
    }

    pub fn mark_object(&mut self, object: *mut Object) {
        if object.is_null() || self.black_set.contains(&object) {
            return;
        }

        if self.white_set.remove(&object) {
            self.gray_set.insert(object);
            gc_trace!("mark enqueue gray ptr={:p}", object);
        }
    }

    pub fn mark_value(&mut self, value: &Value) {
        if !is_object(value) {
            return;
        }
        self.mark_object(as_mutable_object(value));
    }

    /// Keys are interned strings, so both sides are heap references.
    pub fn mark_table(&mut self, table: &Table) {
        for (key, value) in table.iter() {
            self.mark_object(key as *mut Object);
            self.mark_value(value);
        }
    }

    pub fn mark_roots(
        &mut self,
        stack: &[Value],
        stack_top: usize,
        globals: &Table,
        frames: &[CallFrame],
        open_upvalues: &[*mut ObjectUpvalue],
        compiler_roots: &[*mut Object],
        init_string: *mut ObjectString,
    ) {
        for value in &stack[0..stack_top] {
            self.mark_value(value);
        }

        for frame in frames {
            self.mark_object(frame.closure as *mut Object);
        }

        for upvalue in open_upvalues {
            self.mark_object(*upvalue as *mut Object);
        }

        self.mark_table(globals);

        // Compiled functions pinned across the compile → serialize →
        // bootstrap window; empty while the program runs.
        for root in compiler_roots {
            self.mark_object(*root);
        }

        self.mark_object(init_string as *mut Object);
    }

    /// Drain gray objects, blackening each by marking what it references.
    pub fn trace_references(&mut self) {
        while !self.gray_set.is_empty() {
            let object = *self.gray_set.iter().next().unwrap();
            self.gray_set.remove(&object);
            self.black_set.insert(object);
            gc_trace!("trace gray -> black ptr={:p}", object);
            unsafe {
                self.blacken_object(object);
            }
        }
    }

    unsafe fn blacken_object(&mut self, object: *mut Object) {
        match (*object).obj_type {
            ObjectType::ObjClosure => {
                let closure = (*object).as_closure();
                self.mark_object(closure.function as *mut Object);
                for upvalue in &closure.upvalues {
                    self.mark_object(*upvalue as *mut Object);
                }
            }
            ObjectType::ObjFunction => {
                let function = (*object).as_function();
                for constant in function.chunk.iter_constants() {
                    self.mark_value(constant);
                }
            }
            ObjectType::ObjUpvalue => {
                let upvalue = (*object).as_upvalue();
                self.mark_value(&upvalue.closed);
            }
            ObjectType::ObjClass => {
                let class = (*object).as_class();
                self.mark_table(&class.methods);
            }
            ObjectType::ObjInstance => {
                let instance = (*object).as_instance();
                self.mark_object(instance.class as *mut Object);
                self.mark_table(&instance.fields);
            }
            ObjectType::ObjBoundMethod => {
                let bound = (*object).as_bound_method();
                self.mark_value(&bound.receiver);
                self.mark_object(bound.method as *mut Object);
            }
            // Strings and natives hold no outgoing references.
            ObjectType::ObjString | ObjectType::ObjNativeFunction => {}
        }
    }

    pub fn is_marked(&self, object: *mut Object) -> bool {
        !self.white_set.contains(&object)
    }

    /// Weak semantics for the intern table: evict keys that tracing never
    /// reached, before sweep frees them.
    pub fn remove_white_strings(&self, strings: &mut Table) {
        strings.remove_unmarked(|key| self.is_marked(key as *mut Object));
    }

    /// Free everything still white; returns freed bytes.
    pub fn sweep(&mut self, object_manager: &mut ObjectManager) -> usize {
        let mut freed_bytes = 0;
        for &object in self.white_set.iter() {
            unsafe {
                freed_bytes += (*object).deep_size();
            }
            object_manager.remove_object(object);
            unsafe {
                free_object(object);
            }
        }
        self.white_set.clear();
        gc_trace!("sweep freed_bytes={}", freed_bytes);
        freed_bytes
    }

    pub fn reset(&mut self) {
        self.white_set.clear();
        self.gray_set.clear();
        self.black_set.clear();
    }

    /// The VM reports byte counters once a cycle finishes.
    pub fn record_cycle(&mut self, before: usize, freed: usize, after: usize, next_trigger: usize) {
        self.stats.record(before, freed, after, next_trigger);
        if *GC_LOG {
            eprintln!(
                "[gc] cycle {}: {} -> {} bytes (freed {}, next trigger {})",
                self.stats.cycles, before, after, freed, next_trigger
            );
        }
        gc_trace!(
            "cycle summary cycles={} freed={} before={} after={} next_trigger={}",
            self.stats.cycles,
            freed,
            before,
            after,
            next_trigger
        );
    }

    pub fn stats(&self) -> &GCStats {
        &self.stats
    }
}

impl Default for GarbageCollector {
    fn default() -> Self {
        GarbageCollector::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::object_string::hash_string;
    use crate::value::{make_nil_value, make_object_value, Value};

    fn collect(
        gc: &mut GarbageCollector,
        manager: &mut ObjectManager,
        strings: &mut Table,
        stack: &[Value],
        stack_top: usize,
        globals: &Table,
        open_upvalues: &[*mut ObjectUpvalue],
    ) -> usize {
        gc.prepare_collection(manager);
        gc.mark_roots(
            stack,
            stack_top,
            globals,
            &[],
            open_upvalues,
            &[],
            std::ptr::null_mut(),
        );
        gc.trace_references();
        gc.remove_white_strings(strings);
        gc.sweep(manager)
    }

    #[test]
    fn test_collects_unreachable_objects() {
        let mut manager = ObjectManager::new();
        let mut strings = Table::new();
        let (keep, _) = manager.alloc_string("keep", hash_string("keep"));
        manager.alloc_string("drop1", hash_string("drop1"));
        manager.alloc_string("drop2", hash_string("drop2"));

        let mut gc = GarbageCollector::new();
        let mut stack = [Value::new(); 8];
        stack[0] = make_object_value(keep as *mut Object);
        let globals = Table::new();

        let freed = collect(&mut gc, &mut manager, &mut strings, &stack, 1, &globals, &[]);
        assert!(freed > 0);
        assert_eq!(manager.object_count(), 1);
    }

    #[test]
    fn test_preserves_closure_and_function_chain() {
        let mut manager = ObjectManager::new();
        let mut strings = Table::new();
        let (function, _) = manager.alloc_function(0, "f1".to_string());
        let (closure, _) = manager.alloc_closure(function);
        manager.alloc_function(0, "f2".to_string());

        let mut gc = GarbageCollector::new();
        let mut stack = [Value::new(); 8];
        stack[0] = make_object_value(closure as *mut Object);
        let globals = Table::new();

        collect(&mut gc, &mut manager, &mut strings, &stack, 1, &globals, &[]);
        assert_eq!(manager.object_count(), 2);
    }

    #[test]
    fn test_open_upvalue_roots_keep_objects() {
        let mut manager = ObjectManager::new();
        let mut strings = Table::new();
        let (captured, _) = manager.alloc_string("captured", hash_string("captured"));
        let mut stack = [Value::new(); 8];
        stack[0] = make_object_value(captured as *mut Object);
        let (upvalue, _) = manager.alloc_upvalue(&mut stack[0] as *mut Value);

        let mut gc = GarbageCollector::new();
        let globals = Table::new();
        let open_upvalues = vec![upvalue];

        collect(
            &mut gc,
            &mut manager,
            &mut strings,
            &stack,
            1,
            &globals,
            &open_upvalues,
        );
        assert_eq!(manager.object_count(), 2);
    }

    #[test]
    fn test_instance_keeps_class_and_fields() {
        let mut manager = ObjectManager::new();
        let mut strings = Table::new();
        let (class, _) = manager.alloc_class("Point".to_string());
        let (instance, _) = manager.alloc_instance(class);
        let (field_name, _) = manager.alloc_string("x", hash_string("x"));
        let (field_value, _) = manager.alloc_string("ten", hash_string("ten"));
        unsafe {
            (*instance)
                .fields
                .set(field_name, make_object_value(field_value as *mut Object));
        }

        let mut gc = GarbageCollector::new();
        let mut stack = [Value::new(); 8];
        stack[0] = make_object_value(instance as *mut Object);
        let globals = Table::new();

        collect(&mut gc, &mut manager, &mut strings, &stack, 1, &globals, &[]);
        // Instance, class, field key and field value all survive.
        assert_eq!(manager.object_count(), 4);
    }

    #[test]
    fn test_intern_table_is_weak() {
        let mut manager = ObjectManager::new();
        let mut strings = Table::new();
        let (kept, _) = manager.alloc_string("kept", hash_string("kept"));
        let (lost, _) = manager.alloc_string("lost", hash_string("lost"));
        strings.set(kept, make_nil_value());
        strings.set(lost, make_nil_value());

        let mut gc = GarbageCollector::new();
        let mut stack = [Value::new(); 8];
        stack[0] = make_object_value(kept as *mut Object);
        let globals = Table::new();

        collect(&mut gc, &mut manager, &mut strings, &stack, 1, &globals, &[]);
        assert_eq!(manager.object_count(), 1);
        assert_eq!(strings.len(), 1);
        assert!(strings
            .find_string("kept", hash_string("kept"))
            .is_some());
        assert!(strings.find_string("lost", hash_string("lost")).is_none());
    }

    #[test]
    fn test_stats_record_cycle() {
        let mut gc = GarbageCollector::new();
        assert_eq!(gc.stats().cycles, 0);
        gc.record_cycle(1000, 400, 600, 1200);
        assert_eq!(gc.stats().cycles, 1);
        assert_eq!(gc.stats().last_freed_bytes, 400);
        assert_eq!(gc.stats().last_after_bytes, 600);
        assert_eq!(gc.stats().total_freed_bytes, 400);
    }
}
