use crate::objects::object::{Object, ObjectType};
use crate::objects::object_bound_method::ObjectBoundMethod;
use crate::objects::object_class::{ObjectClass, ObjectInstance};
use crate::objects::object_closure::ObjectClosure;
use crate::objects::object_function::ObjectFunction;
use crate::objects::object_manager::ObjectManager;
use crate::objects::object_native_function::ObjectNativeFunction;
use crate::objects::object_string::{hash_string, ObjectString};
use crate::table::Table;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    ValueBool,
    ValueNil,
    ValueNumber,
    ValueObject,
}

#[derive(Clone, Copy)]
pub union ValueUnion {
    pub boolean: bool,
    pub number: f64,
    pub object: *mut Object,
}

#[derive(Clone, Copy)]
pub struct Value {
    pub value_type: ValueType,
    pub value_as: ValueUnion,
}

impl Value {
    pub fn new() -> Value {
        make_nil_value()
    }
}

impl Default for Value {
    fn default() -> Self {
        make_nil_value()
    }
}

// Tags first; numbers by IEEE-754 ==, objects by heap identity. Interned
// strings are deduplicated, so identity is content equality for them.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        if self.value_type != other.value_type {
            return false;
        }
        match self.value_type {
            ValueType::ValueNil => true,
            ValueType::ValueBool => as_bool(self) == as_bool(other),
            ValueType::ValueNumber => as_number(self) == as_number(other),
            ValueType::ValueObject => std::ptr::eq(as_object(self), as_object(other)),
        }
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", format_value(self))
    }
}

pub fn make_nil_value() -> Value {
    Value {
        value_type: ValueType::ValueNil,
        value_as: ValueUnion { number: 0.0 },
    }
}

pub fn make_bool_value(boolean: bool) -> Value {
    Value {
        value_type: ValueType::ValueBool,
        value_as: ValueUnion { boolean },
    }
}

pub fn make_number_value(number: f64) -> Value {
    Value {
        value_type: ValueType::ValueNumber,
        value_as: ValueUnion { number },
    }
}

pub fn make_object_value(object: *mut Object) -> Value {
    Value {
        value_type: ValueType::ValueObject,
        value_as: ValueUnion { object },
    }
}

pub fn is_nil(value: &Value) -> bool {
    value.value_type == ValueType::ValueNil
}

pub fn is_bool(value: &Value) -> bool {
    value.value_type == ValueType::ValueBool
}

pub fn is_number(value: &Value) -> bool {
    value.value_type == ValueType::ValueNumber
}

pub fn is_object(value: &Value) -> bool {
    value.value_type == ValueType::ValueObject
}

pub fn as_bool(value: &Value) -> bool {
    debug_assert!(is_bool(value));
    unsafe { value.value_as.boolean }
}

pub fn as_number(value: &Value) -> f64 {
    debug_assert!(is_number(value));
    unsafe { value.value_as.number }
}

pub fn as_object(value: &Value) -> *const Object {
    debug_assert!(is_object(value));
    unsafe { value.value_as.object }
}

pub fn as_mutable_object(value: &Value) -> *mut Object {
    debug_assert!(is_object(value));
    unsafe { value.value_as.object }
}

fn object_type(value: &Value) -> Option<ObjectType> {
    if !is_object(value) {
        return None;
    }
    Some(unsafe { (*value.value_as.object).obj_type })
}

pub fn is_string(value: &Value) -> bool {
    object_type(value) == Some(ObjectType::ObjString)
}

pub fn is_function(value: &Value) -> bool {
    object_type(value) == Some(ObjectType::ObjFunction)
}

pub fn is_native_function(value: &Value) -> bool {
    object_type(value) == Some(ObjectType::ObjNativeFunction)
}

pub fn is_closure(value: &Value) -> bool {
    object_type(value) == Some(ObjectType::ObjClosure)
}

pub fn is_class(value: &Value) -> bool {
    object_type(value) == Some(ObjectType::ObjClass)
}

pub fn is_instance(value: &Value) -> bool {
    object_type(value) == Some(ObjectType::ObjInstance)
}

pub fn is_bound_method(value: &Value) -> bool {
    object_type(value) == Some(ObjectType::ObjBoundMethod)
}

pub fn as_string(value: &Value) -> *mut ObjectString {
    debug_assert!(is_string(value));
    as_mutable_object(value) as *mut ObjectString
}

pub fn as_function(value: &Value) -> *mut ObjectFunction {
    debug_assert!(is_function(value));
    as_mutable_object(value) as *mut ObjectFunction
}

pub fn as_native_function(value: &Value) -> *mut ObjectNativeFunction {
    debug_assert!(is_native_function(value));
    as_mutable_object(value) as *mut ObjectNativeFunction
}

pub fn as_closure(value: &Value) -> *mut ObjectClosure {
    debug_assert!(is_closure(value));
    as_mutable_object(value) as *mut ObjectClosure
}

pub fn as_class(value: &Value) -> *mut ObjectClass {
    debug_assert!(is_class(value));
    as_mutable_object(value) as *mut ObjectClass
}

pub fn as_instance(value: &Value) -> *mut ObjectInstance {
    debug_assert!(is_instance(value));
    as_mutable_object(value) as *mut ObjectInstance
}

pub fn as_bound_method(value: &Value) -> *mut ObjectBoundMethod {
    debug_assert!(is_bound_method(value));
    as_mutable_object(value) as *mut ObjectBoundMethod
}

/// Only nil and false are falsey.
pub fn is_falsey(value: &Value) -> bool {
    is_nil(value) || (is_bool(value) && !as_bool(value))
}

/// Canonicalizing string constructor: returns the one ObjectString for a
/// given byte sequence, allocating and registering it on a miss.
pub fn intern_string(
    object_manager: &mut ObjectManager,
    strings: &mut Table,
    content: &str,
) -> *mut ObjectString {
    let hash = hash_string(content);
    if let Some(existing) = strings.find_string(content, hash) {
        return existing;
    }

    let (string, _) = object_manager.alloc_string(content, hash);
    strings.set(string, make_nil_value());
    string
}

pub fn make_string_value(
    object_manager: &mut ObjectManager,
    strings: &mut Table,
    content: &str,
) -> Value {
    let string = intern_string(object_manager, strings, content);
    make_object_value(string as *mut Object)
}

fn format_function(function: *const ObjectFunction) -> String {
    let name = unsafe { &(*function).name };
    if name.is_empty() {
        "<script>".to_string()
    } else {
        format!("<fn {}>", name)
    }
}

pub fn format_value(value: &Value) -> String {
    match value.value_type {
        ValueType::ValueNil => "nil".to_string(),
        ValueType::ValueBool => as_bool(value).to_string(),
        ValueType::ValueNumber => format!("{}", as_number(value)),
        ValueType::ValueObject => unsafe {
            let object = as_object(value);
            match (*object).obj_type {
                ObjectType::ObjString => (*object).as_string().content.clone(),
                ObjectType::ObjFunction => format_function((*object).as_function()),
                ObjectType::ObjNativeFunction => "<native fn>".to_string(),
                ObjectType::ObjClosure => format_function((*object).as_closure().function),
                ObjectType::ObjUpvalue => "upvalue".to_string(),
                ObjectType::ObjClass => (*object).as_class().name.clone(),
                ObjectType::ObjInstance => {
                    format!("{} instance", (*(*object).as_instance().class).name)
                }
                ObjectType::ObjBoundMethod => {
                    format_function((*(*object).as_bound_method().method).function)
                }
            }
        },
    }
}

pub fn print_value(value: &Value) {
    print!("{}", format_value(value));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_equality() {
        assert_eq!(make_nil_value(), make_nil_value());
        assert_eq!(make_bool_value(true), make_bool_value(true));
        assert_ne!(make_bool_value(true), make_bool_value(false));
        assert_eq!(make_number_value(1.5), make_number_value(1.5));
        assert_ne!(make_number_value(0.0), make_nil_value());
        assert_ne!(make_number_value(f64::NAN), make_number_value(f64::NAN));
    }

    #[test]
    fn test_falsiness() {
        assert!(is_falsey(&make_nil_value()));
        assert!(is_falsey(&make_bool_value(false)));
        assert!(!is_falsey(&make_bool_value(true)));
        assert!(!is_falsey(&make_number_value(0.0)));
    }

    #[test]
    fn test_number_formatting() {
        assert_eq!(format_value(&make_number_value(3.0)), "3");
        assert_eq!(format_value(&make_number_value(2.5)), "2.5");
        assert_eq!(format_value(&make_number_value(-0.25)), "-0.25");
    }

    #[test]
    fn test_interning_returns_canonical_pointer() {
        let mut object_manager = ObjectManager::new();
        let mut strings = Table::new();
        let first = intern_string(&mut object_manager, &mut strings, "abc");
        let second = intern_string(&mut object_manager, &mut strings, "abc");
        let other = intern_string(&mut object_manager, &mut strings, "abd");
        assert!(std::ptr::eq(first, second));
        assert!(!std::ptr::eq(first, other));
        assert_eq!(strings.len(), 2);
    }

    #[test]
    fn test_interned_string_equality_is_identity() {
        let mut object_manager = ObjectManager::new();
        let mut strings = Table::new();
        let a = make_string_value(&mut object_manager, &mut strings, "hi");
        let b = make_string_value(&mut object_manager, &mut strings, "hi");
        let c = make_string_value(&mut object_manager, &mut strings, "ho");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
