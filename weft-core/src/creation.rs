//! 构造中组件的跟踪
//!
//! 组件在工厂函数执行期间被标记为“构造中”，此时对它的任何查找都应立即失败，
//! 而不是拿到半初始化的实例。

use crate::error::{CoreError, CoreResult};
use parking_lot::Mutex;
use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct CreationTracker {
    creating: Mutex<HashSet<String>>,
}

impl CreationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_creating(&self, name: &str) -> bool {
        self.creating.lock().contains(name)
    }

    /// 标记组件开始构造，返回的守卫在离开作用域时自动清除标记
    ///
    /// 同名组件已在构造中时返回 [`CoreError::CurrentlyInCreation`]。
    pub fn begin(&self, name: &str) -> CoreResult<CreationGuard<'_>> {
        let mut creating = self.creating.lock();
        if !creating.insert(name.to_string()) {
            return Err(CoreError::CurrentlyInCreation(name.to_string()));
        }
        Ok(CreationGuard {
            tracker: self,
            name: name.to_string(),
        })
    }

    /// 查找前的检查
    pub fn ensure_not_creating(&self, name: &str) -> CoreResult<()> {
        if self.is_creating(name) {
            Err(CoreError::CurrentlyInCreation(name.to_string()))
        } else {
            Ok(())
        }
    }

    pub fn in_creation(&self) -> Vec<String> {
        let mut names: Vec<String> = self.creating.lock().iter().cloned().collect();
        names.sort();
        names
    }
}

#[derive(Debug)]
pub struct CreationGuard<'a> {
    tracker: &'a CreationTracker,
    name: String,
}

impl Drop for CreationGuard<'_> {
    fn drop(&mut self) {
        self.tracker.creating.lock().remove(&self.name);
    }
}
