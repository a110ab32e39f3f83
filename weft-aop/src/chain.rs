//! 通知链（AdviceChain）构建
//!
//! 对一个方法签名，从全部绑定中筛出匹配的通知并排序：
//!
//! 1. `order` 升序，数值小的在外层；
//! 2. 同一 `order` 内，after-* 通知包在 before/around 外面，按声明逆序排列，
//!    使它们的收尾逻辑按声明顺序执行；
//! 3. before/around 通知按声明顺序嵌套。

use crate::advice::{AdviceKind, AroundAdvice};
use crate::error::AopResult;
use crate::pointcut::{MatchContext, PointcutRegistry, PointcutRule};
use crate::proxy::ProxyStrategy;
use crate::signature::{MethodSignature, TypeRegistry};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// 调用链上的一环
#[derive(Clone)]
pub struct ChainLink {
    pub(crate) name: String,
    pub(crate) kind: AdviceKind,
    pub(crate) order: i32,
    pub(crate) advice: Arc<dyn AroundAdvice>,
}

impl ChainLink {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> AdviceKind {
        self.kind
    }

    pub fn order(&self) -> i32 {
        self.order
    }
}

impl fmt::Debug for ChainLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainLink")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("order", &self.order)
            .finish()
    }
}

/// 已解析的绑定：规则已解析、通知已转换为环绕形状
#[derive(Clone)]
pub(crate) struct ResolvedBinding {
    pub(crate) name: String,
    pub(crate) kind: AdviceKind,
    pub(crate) order: i32,
    pub(crate) seq: usize,
    pub(crate) rule: PointcutRule,
    pub(crate) advice: Arc<dyn AroundAdvice>,
}

impl ResolvedBinding {
    fn sort_key(&self) -> (i32, u8, i64) {
        if self.kind.is_after() {
            (self.order, 0, -(self.seq as i64))
        } else {
            (self.order, 1, self.seq as i64)
        }
    }
}

/// 一个方法的有序通知链
#[derive(Debug, Clone)]
pub struct AdviceChain {
    signature: MethodSignature,
    links: Vec<ChainLink>,
}

impl AdviceChain {
    pub fn signature(&self) -> &MethodSignature {
        &self.signature
    }

    pub fn links(&self) -> &[ChainLink] {
        &self.links
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// 由外到内的通知名称
    pub fn names(&self) -> Vec<&str> {
        self.links.iter().map(|link| link.name.as_str()).collect()
    }
}

/// 通知链构建器
pub(crate) struct ChainBuilder<'a> {
    pub(crate) types: &'a TypeRegistry,
    pub(crate) rules: &'a PointcutRegistry,
    pub(crate) bindings: &'a [ResolvedBinding],
    pub(crate) strategy: ProxyStrategy,
}

impl ChainBuilder<'_> {
    pub(crate) fn build(&self, signature: &MethodSignature) -> AopResult<AdviceChain> {
        let ctx = MatchContext::new(signature, self.types, self.rules).with_strategy(self.strategy);

        let mut matched = Vec::new();
        for binding in self.bindings {
            if binding.rule.matches(&ctx)? {
                matched.push(binding);
            }
        }
        matched.sort_by_key(|binding| binding.sort_key());

        let links: Vec<ChainLink> = matched
            .into_iter()
            .map(|binding| ChainLink {
                name: binding.name.clone(),
                kind: binding.kind,
                order: binding.order,
                advice: Arc::clone(&binding.advice),
            })
            .collect();

        let chain = AdviceChain {
            signature: signature.clone(),
            links,
        };
        debug!(
            "Built advice chain for {} ({:?}): {:?}",
            signature,
            self.strategy,
            chain.names()
        );
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advice::{around_fn, before_fn, Advice};

    fn binding(name: &str, kind: AdviceKind, order: i32, seq: usize, expr: &str) -> ResolvedBinding {
        let advice = match kind {
            AdviceKind::Around => Advice::Around(Arc::new(around_fn(|pjp| pjp.proceed()))),
            _ => Advice::Before(Arc::new(before_fn(|_| Ok(())))),
        };
        ResolvedBinding {
            name: name.to_string(),
            kind,
            order,
            seq,
            rule: PointcutRule::parse(expr).unwrap(),
            advice: advice.into_around(),
        }
    }

    fn build(bindings: &[ResolvedBinding], signature: &MethodSignature) -> AdviceChain {
        let types = TypeRegistry::new();
        let rules = PointcutRegistry::new();
        ChainBuilder {
            types: &types,
            rules: &rules,
            bindings,
            strategy: ProxyStrategy::Class,
        }
        .build(signature)
        .unwrap()
    }

    #[test]
    fn test_filters_and_orders() {
        let all = "execution(* *(..))";
        let bindings = vec![
            binding("A", AdviceKind::Before, 0, 0, all),
            binding("B", AdviceKind::Around, 0, 1, all),
            binding("C", AdviceKind::AfterReturning, 0, 2, all),
            binding("D", AdviceKind::After, 0, 3, all),
            binding("outer", AdviceKind::Around, -1, 4, all),
            binding("inner", AdviceKind::Around, 5, 5, all),
            binding("other", AdviceKind::Around, 0, 6, "execution(* nothing(..))"),
        ];
        let sig = MethodSignature::new("app.order.OrderService", "orderItem");
        let chain = build(&bindings, &sig);

        assert_eq!(chain.names(), vec!["outer", "D", "C", "A", "B", "inner"]);
    }

    #[test]
    fn test_declaration_order_breaks_ties() {
        let all = "execution(* *(..))";
        let bindings: Vec<_> = (0..5)
            .map(|i| binding(&format!("a{}", i), AdviceKind::Around, 0, i, all))
            .collect();
        let sig = MethodSignature::new("app.order.OrderService", "orderItem");

        for _ in 0..3 {
            assert_eq!(build(&bindings, &sig).names(), vec!["a0", "a1", "a2", "a3", "a4"]);
        }
    }

    #[test]
    fn test_no_match_is_direct() {
        let bindings = vec![binding("A", AdviceKind::Before, 0, 0, "execution(* nothing(..))")];
        let sig = MethodSignature::new("app.order.OrderService", "orderItem");
        let chain = build(&bindings, &sig);
        assert!(chain.is_empty());
        assert_eq!(chain.signature(), &sig);
    }
}
