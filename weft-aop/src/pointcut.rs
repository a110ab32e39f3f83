//! 切点（Pointcut）规则系统
//!
//! 规则是针对 [`MethodSignature`] 的纯谓词，可以组合、命名并相互引用。
//!
//! 支持的文本形式：
//!
//! ```text
//! execution(public String hello.aop..*Service.*(String, ..))
//! within(hello.aop.order..*)
//! this(hello.aop.member.MemberService)
//! target(hello.aop.member.MemberServiceImpl)
//! @annotation(Retry)
//! allOrder() && !Pointcuts.allService()
//! ```

use crate::error::{AopError, AopResult};
use crate::pattern::{ExecutionPattern, TypePattern};
use crate::proxy::ProxyStrategy;
use crate::signature::{MethodSignature, TypeRegistry};
use std::collections::HashMap;
use std::fmt;

/// 切点规则
#[derive(Debug, Clone)]
pub enum PointcutRule {
    /// execution(...)：方法执行
    Execution(ExecutionPattern),

    /// within(...)：只看声明类型，不考虑祖先
    Within(TypePattern),

    /// this(Type)：代理对象自身可以作为 Type 使用
    This(String),

    /// target(Type)：真实目标可以作为 Type 使用
    Target(String),

    /// @annotation(Marker)
    Annotated(String),

    And(Box<PointcutRule>, Box<PointcutRule>),

    Or(Box<PointcutRule>, Box<PointcutRule>),

    Not(Box<PointcutRule>),

    /// 引用另一个命名切点
    Reference(String),
}

/// 匹配时需要的上下文
#[derive(Clone, Copy)]
pub struct MatchContext<'a> {
    pub signature: &'a MethodSignature,
    pub types: &'a TypeRegistry,
    pub rules: &'a PointcutRegistry,
    /// 未指定时 `this` 按类代理处理
    pub strategy: Option<ProxyStrategy>,
}

impl<'a> MatchContext<'a> {
    pub fn new(
        signature: &'a MethodSignature,
        types: &'a TypeRegistry,
        rules: &'a PointcutRegistry,
    ) -> Self {
        Self {
            signature,
            types,
            rules,
            strategy: None,
        }
    }

    pub fn with_strategy(mut self, strategy: ProxyStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }
}

impl PointcutRule {
    /// 解析文本表达式
    pub fn parse(expression: &str) -> AopResult<Self> {
        let tokens = tokenize(expression)?;
        let mut parser = Parser {
            source: expression,
            tokens,
            pos: 0,
        };
        let rule = parser.parse_or()?;
        if parser.pos != parser.tokens.len() {
            return Err(AopError::malformed(expression, "unexpected trailing input"));
        }
        Ok(rule)
    }

    /// 由三个子模式构造 execution 规则
    ///
    /// # 示例
    ///
    /// ```ignore
    /// let rule = PointcutRule::execution("hello.aop.order..", "*", "(..)")?;
    /// ```
    pub fn execution(
        type_pattern: &str,
        method_pattern: &str,
        param_pattern: &str,
    ) -> AopResult<Self> {
        Ok(PointcutRule::Execution(ExecutionPattern::new(
            type_pattern,
            method_pattern,
            param_pattern,
        )?))
    }

    /// 包范围：`recursive` 为 true 时包含全部子包
    pub fn within_package(package: &str, recursive: bool) -> AopResult<Self> {
        let pattern = if recursive {
            format!("{}..*", package)
        } else {
            format!("{}.*", package)
        };
        Ok(PointcutRule::Within(TypePattern::parse(&pattern)?))
    }

    /// 按类型名匹配，单段模式匹配简单名，例如 `*Service`
    pub fn type_name(pattern: &str) -> AopResult<Self> {
        Ok(PointcutRule::Within(TypePattern::parse(pattern)?))
    }

    pub fn annotated(marker: impl Into<String>) -> Self {
        PointcutRule::Annotated(marker.into())
    }

    pub fn reference(name: impl Into<String>) -> Self {
        PointcutRule::Reference(name.into())
    }

    pub fn and(self, other: PointcutRule) -> Self {
        PointcutRule::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: PointcutRule) -> Self {
        PointcutRule::Or(Box::new(self), Box::new(other))
    }

    pub fn negate(self) -> Self {
        PointcutRule::Not(Box::new(self))
    }

    /// 直接引用的命名切点
    pub fn references(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_references(&mut names);
        names
    }

    fn collect_references<'r>(&'r self, names: &mut Vec<&'r str>) {
        match self {
            PointcutRule::Reference(name) => names.push(name),
            PointcutRule::And(a, b) | PointcutRule::Or(a, b) => {
                a.collect_references(names);
                b.collect_references(names);
            }
            PointcutRule::Not(inner) => inner.collect_references(names),
            _ => {}
        }
    }

    /// 检查规则是否匹配
    ///
    /// 对同一签名与同一上下文，结果总是相同且没有副作用。
    pub fn matches(&self, ctx: &MatchContext<'_>) -> AopResult<bool> {
        self.evaluate(ctx, &mut Vec::new())
    }

    fn evaluate(&self, ctx: &MatchContext<'_>, resolving: &mut Vec<String>) -> AopResult<bool> {
        let signature = ctx.signature;
        let concrete = signature.declaring_type();

        match self {
            PointcutRule::Execution(pattern) => Ok(pattern.matches(signature, ctx.types)),

            PointcutRule::Within(pattern) => Ok(pattern.matches(concrete)),

            PointcutRule::Target(type_name) => Ok(ctx.types.is_assignable(concrete, type_name)),

            PointcutRule::This(type_name) => Ok(match ctx.strategy {
                Some(ProxyStrategy::Interface) => ctx
                    .types
                    .interfaces_of(concrete)
                    .iter()
                    .any(|iface| iface == type_name),
                _ => ctx.types.is_assignable(concrete, type_name),
            }),

            PointcutRule::Annotated(marker) => Ok(signature.has_marker(marker)),

            PointcutRule::And(a, b) => {
                Ok(a.evaluate(ctx, resolving)? && b.evaluate(ctx, resolving)?)
            }

            PointcutRule::Or(a, b) => {
                Ok(a.evaluate(ctx, resolving)? || b.evaluate(ctx, resolving)?)
            }

            PointcutRule::Not(inner) => Ok(!inner.evaluate(ctx, resolving)?),

            PointcutRule::Reference(name) => {
                if resolving.iter().any(|n| n == name) {
                    return Err(AopError::CircularReference(name.clone()));
                }
                let rule = ctx.rules.get(name)?;
                resolving.push(name.clone());
                let result = rule.evaluate(ctx, resolving);
                resolving.pop();
                result
            }
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            PointcutRule::Or(..) => 1,
            PointcutRule::And(..) => 2,
            _ => 3,
        }
    }

    fn fmt_operand(&self, f: &mut fmt::Formatter<'_>, parent: u8) -> fmt::Result {
        if self.precedence() < parent {
            write!(f, "({})", self)
        } else {
            write!(f, "{}", self)
        }
    }
}

impl fmt::Display for PointcutRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointcutRule::Execution(pattern) => write!(f, "{}", pattern),
            PointcutRule::Within(pattern) => write!(f, "within({})", pattern.as_str()),
            PointcutRule::This(t) => write!(f, "this({})", t),
            PointcutRule::Target(t) => write!(f, "target({})", t),
            PointcutRule::Annotated(m) => write!(f, "@annotation({})", m),
            PointcutRule::And(a, b) => {
                a.fmt_operand(f, 2)?;
                f.write_str(" && ")?;
                b.fmt_operand(f, 2)
            }
            PointcutRule::Or(a, b) => {
                a.fmt_operand(f, 1)?;
                f.write_str(" || ")?;
                b.fmt_operand(f, 1)
            }
            PointcutRule::Not(inner) => {
                f.write_str("!")?;
                inner.fmt_operand(f, 3)
            }
            PointcutRule::Reference(name) => write!(f, "{}()", name),
        }
    }
}

/// 命名切点注册表
#[derive(Debug, Clone, Default)]
pub struct PointcutRegistry {
    rules: HashMap<String, PointcutRule>,
}

impl PointcutRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册命名切点，名称重复时报错
    pub fn register(&mut self, name: impl Into<String>, rule: PointcutRule) -> AopResult<()> {
        let name = name.into();
        if self.rules.contains_key(&name) {
            return Err(AopError::DuplicateRule(name));
        }
        self.rules.insert(name, rule);
        Ok(())
    }

    pub fn register_expression(
        &mut self,
        name: impl Into<String>,
        expression: &str,
    ) -> AopResult<()> {
        let rule = PointcutRule::parse(expression)?;
        self.register(name, rule)
    }

    pub fn get(&self, name: &str) -> AopResult<&PointcutRule> {
        self.rules
            .get(name)
            .ok_or_else(|| AopError::RuleNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.rules.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.rules.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// 校验所有命名切点的引用都存在且无环
    pub fn validate(&self) -> AopResult<()> {
        for name in self.names() {
            let rule = self.get(name)?;
            self.check_references(rule, &mut vec![name.to_string()])?;
        }
        Ok(())
    }

    /// 校验一条（未命名的）规则引用的切点
    pub fn validate_rule(&self, rule: &PointcutRule) -> AopResult<()> {
        self.check_references(rule, &mut Vec::new())
    }

    fn check_references(&self, rule: &PointcutRule, path: &mut Vec<String>) -> AopResult<()> {
        for name in rule.references() {
            if path.iter().any(|p| p == name) {
                return Err(AopError::CircularReference(name.to_string()));
            }
            let target = self.get(name)?;
            path.push(name.to_string());
            self.check_references(target, path)?;
            path.pop();
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    And,
    Or,
    Not,
    LParen,
    RParen,
    Designator { kind: String, body: String },
    Reference(String),
}

const DESIGNATORS: [&str; 5] = ["execution", "within", "this", "target", "@annotation"];

fn tokenize(source: &str) -> AopResult<Vec<Token>> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '&' | '|' => {
                if chars.get(i + 1) != Some(&c) {
                    return Err(AopError::malformed(
                        source,
                        format!("expected '{}{}'", c, c),
                    ));
                }
                tokens.push(if c == '&' { Token::And } else { Token::Or });
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            c if c.is_alphabetic() || c == '_' || c == '@' => {
                let start = i;
                while i < chars.len() && is_ident_char(chars[i]) {
                    i += 1;
                }
                let ident: String = chars[start..i].iter().collect();
                while i < chars.len() && chars[i].is_whitespace() {
                    i += 1;
                }
                if chars.get(i) != Some(&'(') {
                    return Err(AopError::malformed(
                        source,
                        format!("expected '(' after '{}'", ident),
                    ));
                }
                i += 1;

                if DESIGNATORS.contains(&ident.as_str()) {
                    let body_start = i;
                    let mut depth = 1;
                    while i < chars.len() {
                        match chars[i] {
                            '(' => depth += 1,
                            ')' => {
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                            }
                            _ => {}
                        }
                        i += 1;
                    }
                    if depth != 0 {
                        return Err(AopError::malformed(source, "unbalanced parentheses"));
                    }
                    let body: String = chars[body_start..i].iter().collect();
                    i += 1;
                    tokens.push(Token::Designator { kind: ident, body });
                } else {
                    while i < chars.len() && chars[i].is_whitespace() {
                        i += 1;
                    }
                    if chars.get(i) != Some(&')') {
                        return Err(AopError::malformed(
                            source,
                            format!("named pointcut '{}' takes no arguments", ident),
                        ));
                    }
                    i += 1;
                    tokens.push(Token::Reference(ident));
                }
            }
            other => {
                return Err(AopError::malformed(
                    source,
                    format!("unexpected character '{}'", other),
                ))
            }
        }
    }

    if tokens.is_empty() {
        return Err(AopError::malformed(source, "empty expression"));
    }
    Ok(tokens)
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '$' | '.' | '@')
}

struct Parser<'s> {
    source: &'s str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn error(&self, reason: impl Into<String>) -> AopError {
        AopError::malformed(self.source, reason)
    }

    fn parse_or(&mut self) -> AopResult<PointcutRule> {
        let mut rule = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            rule = rule.or(self.parse_and()?);
        }
        Ok(rule)
    }

    fn parse_and(&mut self) -> AopResult<PointcutRule> {
        let mut rule = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            rule = rule.and(self.parse_unary()?);
        }
        Ok(rule)
    }

    fn parse_unary(&mut self) -> AopResult<PointcutRule> {
        match self.next() {
            Some(Token::Not) => Ok(self.parse_unary()?.negate()),
            Some(Token::LParen) => {
                let rule = self.parse_or()?;
                match self.next() {
                    Some(Token::RParen) => Ok(rule),
                    _ => Err(self.error("missing ')'")),
                }
            }
            Some(Token::Reference(name)) => Ok(PointcutRule::Reference(name)),
            Some(Token::Designator { kind, body }) => self.designator(&kind, &body),
            Some(other) => Err(self.error(format!("unexpected token {:?}", other))),
            None => Err(self.error("unexpected end of expression")),
        }
    }

    fn designator(&self, kind: &str, body: &str) -> AopResult<PointcutRule> {
        let body = body.trim();
        match kind {
            "execution" => Ok(PointcutRule::Execution(ExecutionPattern::parse(body)?)),
            "within" => Ok(PointcutRule::Within(TypePattern::parse(body)?)),
            "this" => Ok(PointcutRule::This(self.exact_type(body)?)),
            "target" => Ok(PointcutRule::Target(self.exact_type(body)?)),
            "@annotation" => Ok(PointcutRule::Annotated(self.exact_type(body)?)),
            other => Err(self.error(format!("unknown designator '{}'", other))),
        }
    }

    fn exact_type(&self, body: &str) -> AopResult<String> {
        if body.is_empty() || !body.chars().all(|c| c.is_alphanumeric() || matches!(c, '_' | '$' | '.')) {
            return Err(self.error(format!("expected an exact type name, got '{}'", body)));
        }
        Ok(body.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::TypeDescriptor;

    fn member_types() -> TypeRegistry {
        let mut types = TypeRegistry::new();
        types
            .register(
                TypeDescriptor::interface("hello.aop.member.MemberService")
                    .method("hello", &["String"], "String"),
            )
            .unwrap();
        types
            .register(
                TypeDescriptor::class("hello.aop.member.MemberServiceImpl")
                    .implements("hello.aop.member.MemberService")
                    .method("hello", &["String"], "String")
                    .method("internal", &["String"], "String"),
            )
            .unwrap();
        types
    }

    fn hello() -> MethodSignature {
        MethodSignature::new("hello.aop.member.MemberServiceImpl", "hello")
            .params(["String"])
            .returns("String")
    }

    fn check(expr: &str, sig: &MethodSignature) -> bool {
        let types = member_types();
        let rules = PointcutRegistry::new();
        PointcutRule::parse(expr)
            .unwrap()
            .matches(&MatchContext::new(sig, &types, &rules))
            .unwrap()
    }

    #[test]
    fn test_parse_composition_precedence() {
        let rule = PointcutRule::parse("a() || b() && !c()").unwrap();
        assert_eq!(rule.to_string(), "a() || b() && !c()");

        let grouped = PointcutRule::parse("(a() || b()) && c()").unwrap();
        assert_eq!(grouped.to_string(), "(a() || b()) && c()");
        assert!(matches!(grouped, PointcutRule::And(..)));
    }

    #[test]
    fn test_parse_dotted_reference() {
        let rule = PointcutRule::parse("Pointcuts.allOrder()").unwrap();
        assert_eq!(rule.references(), vec!["Pointcuts.allOrder"]);
    }

    #[test]
    fn test_parse_errors() {
        for bad in [
            "",
            "execution(* *(..)",
            "a() & b()",
            "a() &&",
            "(a()",
            "a(x)",
            "bogus",
            "this(*Service)",
            "execution(hello)",
            "a() b()",
        ] {
            let err = PointcutRule::parse(bad).unwrap_err();
            assert!(matches!(err, AopError::MalformedPattern { .. }), "{}", bad);
        }
    }

    #[test]
    fn test_execution_and_within() {
        let sig = hello();
        assert!(check("execution(* hello.aop.member..*.*(..))", &sig));
        assert!(check("within(hello.aop.member.*)", &sig));
        assert!(!check("within(hello.aop.*)", &sig));
        assert!(check("within(hello.aop..*)", &sig));
        // within 不考虑祖先类型
        assert!(!check("within(hello.aop.member.MemberService)", &sig));
        // 单段模式只看简单名
        assert!(!check("within(hello*)", &sig));
        assert!(check("within(Member*)", &sig));
    }

    #[test]
    fn test_target_and_this() {
        let types = member_types();
        let rules = PointcutRegistry::new();
        let sig = hello();
        let target_impl = PointcutRule::parse("target(hello.aop.member.MemberServiceImpl)").unwrap();
        let this_impl = PointcutRule::parse("this(hello.aop.member.MemberServiceImpl)").unwrap();
        let this_iface = PointcutRule::parse("this(hello.aop.member.MemberService)").unwrap();

        let interface = MatchContext::new(&sig, &types, &rules).with_strategy(ProxyStrategy::Interface);
        let class = MatchContext::new(&sig, &types, &rules).with_strategy(ProxyStrategy::Class);

        assert!(target_impl.matches(&interface).unwrap());
        assert!(target_impl.matches(&class).unwrap());
        assert!(!this_impl.matches(&interface).unwrap());
        assert!(this_impl.matches(&class).unwrap());
        assert!(this_iface.matches(&interface).unwrap());
        assert!(this_iface.matches(&class).unwrap());
    }

    #[test]
    fn test_annotation() {
        let sig = hello().marker("hello.aop.member.annotation.MethodAop");
        assert!(check("@annotation(MethodAop)", &sig));
        assert!(!check("@annotation(ClassAop)", &sig));
    }

    #[test]
    fn test_named_references() {
        let types = member_types();
        let mut rules = PointcutRegistry::new();
        rules
            .register_expression("allMember", "execution(* hello.aop.member..*(..))")
            .unwrap();
        rules
            .register_expression("allHello", "execution(* hello(..))")
            .unwrap();
        rules
            .register_expression("memberAndHello", "allMember() && allHello()")
            .unwrap();
        rules.validate().unwrap();

        let sig = hello();
        let ctx = MatchContext::new(&sig, &types, &rules);
        assert!(PointcutRule::reference("memberAndHello").matches(&ctx).unwrap());
        assert!(!PointcutRule::reference("allMember")
            .negate()
            .matches(&ctx)
            .unwrap());
    }

    #[test]
    fn test_missing_reference() {
        let mut rules = PointcutRegistry::new();
        rules.register_expression("broken", "missing() || within(*)").unwrap();
        assert_eq!(
            rules.validate(),
            Err(AopError::RuleNotFound("missing".to_string()))
        );

        let types = member_types();
        let sig = hello();
        let ctx = MatchContext::new(&sig, &types, &rules);
        // 匹配期同样确定性地报错
        for _ in 0..3 {
            assert_eq!(
                PointcutRule::reference("broken").matches(&ctx),
                Err(AopError::RuleNotFound("missing".to_string()))
            );
        }
    }

    #[test]
    fn test_duplicate_rule_name() {
        let mut rules = PointcutRegistry::new();
        rules.register_expression("allHello", "execution(* hello(..))").unwrap();
        assert_eq!(
            rules.register(
                "allHello",
                PointcutRule::parse("execution(* nono(..))").unwrap()
            ),
            Err(AopError::DuplicateRule("allHello".to_string()))
        );
        // 先注册的规则保持不变
        let sig = hello();
        let types = member_types();
        assert_eq!(
            PointcutRule::reference("allHello").matches(&MatchContext::new(&sig, &types, &rules)),
            Ok(true)
        );
    }

    #[test]
    fn test_circular_reference() {
        let mut rules = PointcutRegistry::new();
        rules.register_expression("a", "b() && within(*)").unwrap();
        rules.register_expression("b", "!a()").unwrap();
        assert!(matches!(
            rules.validate(),
            Err(AopError::CircularReference(_))
        ));

        let types = member_types();
        let sig = hello();
        let ctx = MatchContext::new(&sig, &types, &rules);
        assert!(matches!(
            PointcutRule::reference("a").matches(&ctx),
            Err(AopError::CircularReference(_))
        ));
    }

    #[test]
    fn test_builders() {
        let rule = PointcutRule::within_package("app.order", true)
            .unwrap()
            .and(PointcutRule::type_name("*Service").unwrap());
        let types = TypeRegistry::new();
        let rules = PointcutRegistry::new();

        let service = MethodSignature::new("app.order.OrderService", "orderItem");
        let repository = MethodSignature::new("app.order.OrderRepository", "save");
        let elsewhere = MethodSignature::new("app.member.MemberService", "join");

        assert!(rule.matches(&MatchContext::new(&service, &types, &rules)).unwrap());
        assert!(!rule.matches(&MatchContext::new(&repository, &types, &rules)).unwrap());
        assert!(!rule.matches(&MatchContext::new(&elsewhere, &types, &rules)).unwrap());
    }
}
