//! 资源预算守卫
//!
//! 每个阶段新建一个计数器（如页面访问次数），可挂到多个工具上共享；
//! 耗尽后分发器直接返回预算提示文本而不调用工具。并发调用通过原子 CAS 保证不超限。

use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug)]
pub struct BudgetGuard {
    label: String,
    limit: usize,
    used: AtomicUsize,
}

impl BudgetGuard {
    pub fn new(label: impl Into<String>, limit: usize) -> Self {
        Self {
            label: label.into(),
            limit,
            used: AtomicUsize::new(0),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::SeqCst)
    }

    pub fn remaining(&self) -> usize {
        self.limit.saturating_sub(self.used())
    }

    /// 占用一个单位；已耗尽返回 false
    pub fn try_acquire(&self) -> bool {
        self.used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                (used < self.limit).then_some(used + 1)
            })
            .is_ok()
    }

    /// 耗尽时返回给模型的说明
    pub fn exhausted_message(&self) -> String {
        format!(
            "Budget exceeded: {} limit of {} reached. Work with the information you already have.",
            self.label, self.limit
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_acquire_until_exhausted() {
        let guard = BudgetGuard::new("page visit", 2);
        assert!(guard.try_acquire());
        assert!(guard.try_acquire());
        assert!(!guard.try_acquire());
        assert_eq!(guard.used(), 2);
        assert_eq!(guard.remaining(), 0);
        assert!(guard.exhausted_message().contains("page visit limit of 2"));
    }

    #[test]
    fn test_concurrent_acquire_never_exceeds_limit() {
        let guard = Arc::new(BudgetGuard::new("page visit", 10));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let g = Arc::clone(&guard);
                std::thread::spawn(move || (0..5).filter(|_| g.try_acquire()).count())
            })
            .collect();
        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(granted, 10);
    }
}
