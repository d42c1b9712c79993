use crate::objects::{
    object::{NativeObject, Object},
    object_bound_method::ObjectBoundMethod,
    object_class::{ObjectClass, ObjectInstance},
    object_closure::ObjectClosure,
    object_function::ObjectFunction,
    object_native_function::ObjectNativeFunction,
    object_string::ObjectString,
    object_upvalue::ObjectUpvalue,
};
use crate::value::Value;

/// Owns every heap object for the lifetime of the interpreter. Allocation
/// goes through here so the collector can enumerate the heap and so the VM
/// can account allocated bytes.
pub struct ObjectManager {
    objects: Vec<*mut Object>,
    // Deep size of everything allocated since the VM last drained.
    pending_bytes: usize,
}

impl ObjectManager {
    pub fn new() -> ObjectManager {
        ObjectManager {
            objects: Vec::new(),
            pending_bytes: 0,
        }
    }

    /// Drain and return bytes allocated since the last call.
    pub fn drain_pending_bytes(&mut self) -> usize {
        let bytes = self.pending_bytes;
        self.pending_bytes = 0;
        bytes
    }

    fn push_object(&mut self, object: *mut Object) -> usize {
        let size = unsafe { (*object).deep_size() };
        self.pending_bytes += size;
        self.objects.push(object);
        size
    }

    pub fn alloc_string(&mut self, content: &str, hash: u32) -> (*mut ObjectString, usize) {
        let ptr = Box::into_raw(Box::new(ObjectString::new(content, hash)));
        let size = self.push_object(ptr as *mut Object);
        (ptr, size)
    }

    pub fn alloc_function(&mut self, arity: u16, name: String) -> (*mut ObjectFunction, usize) {
        let ptr = Box::into_raw(Box::new(ObjectFunction::new(arity, name)));
        let size = self.push_object(ptr as *mut Object);
        (ptr, size)
    }

    pub fn alloc_native_function<T: NativeObject + 'static>(
        &mut self,
        name: String,
        arity: u16,
        native_object: T,
    ) -> (*mut ObjectNativeFunction, usize) {
        let ptr = Box::into_raw(Box::new(ObjectNativeFunction::new(
            name,
            arity,
            native_object,
        )));
        let size = self.push_object(ptr as *mut Object);
        (ptr, size)
    }

    pub fn alloc_closure(&mut self, function: *mut ObjectFunction) -> (*mut ObjectClosure, usize) {
        let ptr = Box::into_raw(Box::new(ObjectClosure::new(function)));
        let size = self.push_object(ptr as *mut Object);
        (ptr, size)
    }

    pub fn alloc_upvalue(&mut self, location: *mut Value) -> (*mut ObjectUpvalue, usize) {
        let ptr = Box::into_raw(Box::new(ObjectUpvalue::new(location)));
        let size = self.push_object(ptr as *mut Object);
        (ptr, size)
    }

    pub fn alloc_class(&mut self, name: String) -> (*mut ObjectClass, usize) {
        let ptr = Box::into_raw(Box::new(ObjectClass::new(name)));
        let size = self.push_object(ptr as *mut Object);
        (ptr, size)
    }

    pub fn alloc_instance(&mut self, class: *mut ObjectClass) -> (*mut ObjectInstance, usize) {
        let ptr = Box::into_raw(Box::new(ObjectInstance::new(class)));
        let size = self.push_object(ptr as *mut Object);
        (ptr, size)
    }

    pub fn alloc_bound_method(
        &mut self,
        receiver: Value,
        method: *mut ObjectClosure,
    ) -> (*mut ObjectBoundMethod, usize) {
        let ptr = Box::into_raw(Box::new(ObjectBoundMethod::new(receiver, method)));
        let size = self.push_object(ptr as *mut Object);
        (ptr, size)
    }

    /// Iterate over every live heap object (GC mark/sweep).
    pub fn iter(&self) -> impl Iterator<Item = &*mut Object> {
        self.objects.iter()
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Unlink one pointer during sweep. The caller frees it.
    pub fn remove_object(&mut self, ptr: *mut Object) {
        if let Some(pos) = self.objects.iter().position(|&p| p == ptr) {
            self.objects.swap_remove(pos);
        }
    }

    /// Deallocate everything still owned; interpreter shutdown.
    pub unsafe fn free_all(&mut self) {
        for &ptr in &self.objects {
            if !ptr.is_null() {
                free_object(ptr);
            }
        }
        self.objects.clear();
    }
}

/// Reconstitute the concrete Box so Drop runs for the right type.
pub unsafe fn free_object(object: *mut Object) {
    use crate::objects::object::ObjectType;
    match (*object).obj_type {
        ObjectType::ObjString => drop(Box::from_raw(object as *mut ObjectString)),
        ObjectType::ObjFunction => drop(Box::from_raw(object as *mut ObjectFunction)),
        ObjectType::ObjNativeFunction => {
            drop(Box::from_raw(object as *mut ObjectNativeFunction))
        }
        ObjectType::ObjClosure => drop(Box::from_raw(object as *mut ObjectClosure)),
        ObjectType::ObjUpvalue => drop(Box::from_raw(object as *mut ObjectUpvalue)),
        ObjectType::ObjClass => drop(Box::from_raw(object as *mut ObjectClass)),
        ObjectType::ObjInstance => drop(Box::from_raw(object as *mut ObjectInstance)),
        ObjectType::ObjBoundMethod => drop(Box::from_raw(object as *mut ObjectBoundMethod)),
    }
}

impl Drop for ObjectManager {
    fn drop(&mut self) {
        unsafe {
            self.free_all();
        }
    }
}

impl Default for ObjectManager {
    fn default() -> Self {
        ObjectManager::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::object_string::hash_string;

    #[test]
    fn test_alloc_tracks_pending_bytes() {
        let mut manager = ObjectManager::new();
        assert_eq!(manager.drain_pending_bytes(), 0);
        let (_, size) = manager.alloc_string("tracked", hash_string("tracked"));
        assert!(size > 0);
        assert_eq!(manager.drain_pending_bytes(), size);
        assert_eq!(manager.drain_pending_bytes(), 0);
    }

    #[test]
    fn test_remove_object_unlinks() {
        let mut manager = ObjectManager::new();
        let (a, _) = manager.alloc_string("a", hash_string("a"));
        let (_b, _) = manager.alloc_string("b", hash_string("b"));
        assert_eq!(manager.object_count(), 2);
        manager.remove_object(a as *mut Object);
        assert_eq!(manager.object_count(), 1);
        unsafe { free_object(a as *mut Object) };
    }

    #[test]
    fn test_drop_frees_everything() {
        let mut manager = ObjectManager::new();
        manager.alloc_string("x", hash_string("x"));
        let (function, _) = manager.alloc_function(0, "f".to_string());
        manager.alloc_closure(function);
        drop(manager);
    }
}
