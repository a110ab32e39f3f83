//! 类型擦除的返回值
//!
//! 通知链不知道具体方法的返回类型，链上传递的是 [`Value`]；
//! 代理在链的两端负责装箱与还原。

use std::any::{type_name, Any};
use std::fmt;

trait Reflect: Any + fmt::Debug + Send {
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

impl<T: Any + fmt::Debug + Send> Reflect for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

/// 方法返回值
pub struct Value {
    inner: Box<dyn Reflect>,
    type_name: &'static str,
}

impl Value {
    pub fn new<T: Any + fmt::Debug + Send>(value: T) -> Self {
        Self {
            inner: Box::new(value),
            type_name: type_name::<T>(),
        }
    }

    /// `()`，对应无返回值的方法
    pub fn unit() -> Self {
        Self::new(())
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is<T: Any>(&self) -> bool {
        (*self.inner).as_any().is::<T>()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        (*self.inner).as_any().downcast_ref::<T>()
    }

    /// 还原为具体类型，类型不符时原样返回
    pub fn downcast<T: Any>(self) -> Result<T, Value> {
        if !self.is::<T>() {
            return Err(self);
        }
        match self.inner.into_any().downcast::<T>() {
            Ok(value) => Ok(*value),
            Err(_) => unreachable!("type checked above"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.inner, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_downcast() {
        let value = Value::new("ok".to_string());
        assert!(value.is::<String>());
        assert_eq!(value.downcast_ref::<String>().map(String::as_str), Some("ok"));
        assert_eq!(format!("{:?}", value), "\"ok\"");

        let value = value.downcast::<i32>().unwrap_err();
        assert_eq!(value.downcast::<String>().unwrap(), "ok");
    }

    #[test]
    fn test_unit_value() {
        let value = Value::unit();
        assert!(value.is::<()>());
        assert_eq!(value.type_name(), "()");
    }
}
