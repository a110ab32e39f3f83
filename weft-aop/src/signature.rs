//! 方法签名与类型描述
//!
//! Rust 没有运行时反射，可拦截的类型通过 [`Interceptable`] 显式描述自己：
//! 类型名、祖先类型以及声明的方法。切点只针对这些描述做匹配。

use crate::error::{AopError, AopResult};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// 方法可见性
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Protected,
    Package,
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Protected => "protected",
            Visibility::Package => "package",
            Visibility::Private => "private",
        }
    }
}

impl FromStr for Visibility {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Visibility::Public),
            "protected" => Ok(Visibility::Protected),
            "package" => Ok(Visibility::Package),
            "private" => Ok(Visibility::Private),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 取限定名的最后一段，`hello.aop.member.MemberService` -> `MemberService`
pub fn simple_name(qualified: &str) -> &str {
    qualified.rsplit('.').next().unwrap_or(qualified)
}

/// 方法签名
///
/// 构造完成后不可变，只用于匹配。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSignature {
    declaring_type: String,
    name: String,
    params: Vec<String>,
    return_type: String,
    visibility: Visibility,
    markers: Vec<String>,
}

impl MethodSignature {
    /// 新建一个无参、返回 `void` 的 public 方法签名
    pub fn new(declaring_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            declaring_type: declaring_type.into(),
            name: name.into(),
            params: Vec::new(),
            return_type: "void".to_string(),
            visibility: Visibility::Public,
            markers: Vec::new(),
        }
    }

    pub fn params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params = params.into_iter().map(Into::into).collect();
        self
    }

    pub fn returns(mut self, return_type: impl Into<String>) -> Self {
        self.return_type = return_type.into();
        self
    }

    pub fn visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    /// 附加标记（对应注解，例如 `Retry`、`Trace`）
    pub fn marker(mut self, marker: impl Into<String>) -> Self {
        self.markers.push(marker.into());
        self
    }

    pub(crate) fn on_type(mut self, declaring_type: &str) -> Self {
        self.declaring_type = declaring_type.to_string();
        self
    }

    pub fn declaring_type(&self) -> &str {
        &self.declaring_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn param_types(&self) -> &[String] {
        &self.params
    }

    pub fn return_type(&self) -> &str {
        &self.return_type
    }

    pub fn get_visibility(&self) -> Visibility {
        self.visibility
    }

    pub fn markers(&self) -> &[String] {
        &self.markers
    }

    pub fn has_marker(&self, marker: &str) -> bool {
        self.markers
            .iter()
            .any(|m| m == marker || simple_name(m) == marker || m == simple_name(marker))
    }

    /// 方法键：`hello(String)`，在同一类型内唯一
    pub fn key(&self) -> String {
        format!("{}({})", self.name, self.params.join(","))
    }

    /// 名称与参数列表相同即视为同形方法
    pub fn same_shape(&self, other: &MethodSignature) -> bool {
        self.name == other.name && self.params == other.params
    }

    /// 带可见性的完整形式：`public String a.b.Type.hello(String)`
    pub fn long_string(&self) -> String {
        format!("{} {}", self.visibility, self)
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}.{}({})",
            simple_name(&self.return_type),
            self.declaring_type,
            self.name,
            self.params
                .iter()
                .map(|p| simple_name(p))
                .collect::<Vec<_>>()
                .join(",")
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Interface,
    Class,
}

/// 类型描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    name: String,
    kind: TypeKind,
    supertypes: Vec<String>,
    methods: Vec<MethodSignature>,
    sealed: bool,
}

impl TypeDescriptor {
    pub fn interface(name: impl Into<String>) -> Self {
        Self::new(name.into(), TypeKind::Interface)
    }

    pub fn class(name: impl Into<String>) -> Self {
        Self::new(name.into(), TypeKind::Class)
    }

    fn new(name: String, kind: TypeKind) -> Self {
        Self {
            name,
            kind,
            supertypes: Vec::new(),
            methods: Vec::new(),
            sealed: false,
        }
    }

    /// 实现接口或继承父类
    pub fn extends(mut self, supertype: impl Into<String>) -> Self {
        self.supertypes.push(supertype.into());
        self
    }

    pub fn implements(self, interface: impl Into<String>) -> Self {
        self.extends(interface)
    }

    /// 禁止以类代理方式冒充
    pub fn sealed(mut self) -> Self {
        self.sealed = true;
        self
    }

    /// 声明一个 public 方法
    pub fn method(self, name: &str, params: &[&str], return_type: &str) -> Self {
        let signature = MethodSignature::new(self.name.as_str(), name)
            .params(params.iter().copied())
            .returns(return_type);
        self.declare(signature)
    }

    /// 声明一个完整的方法签名，声明类型改写为当前类型
    pub fn declare(mut self, signature: MethodSignature) -> Self {
        let signature = signature.on_type(&self.name);
        self.methods.push(signature);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    pub fn is_interface(&self) -> bool {
        self.kind == TypeKind::Interface
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn supertypes(&self) -> &[String] {
        &self.supertypes
    }

    pub fn methods(&self) -> &[MethodSignature] {
        &self.methods
    }

    pub fn declares(&self, signature: &MethodSignature) -> bool {
        self.methods.iter().any(|m| m.same_shape(signature))
    }

    pub fn find_method(&self, signature: &MethodSignature) -> Option<&MethodSignature> {
        self.methods.iter().find(|m| m.same_shape(signature))
    }
}

/// 可被代理的类型
///
/// # 示例
///
/// ```ignore
/// impl Interceptable for MemberServiceImpl {
///     fn type_descriptor() -> TypeDescriptor {
///         TypeDescriptor::class("hello.aop.member.MemberServiceImpl")
///             .implements("hello.aop.member.MemberService")
///             .method("hello", &["String"], "String")
///             .method("internal", &["String"], "String")
///     }
///
///     fn supertype_descriptors() -> Vec<TypeDescriptor> {
///         vec![TypeDescriptor::interface("hello.aop.member.MemberService")
///             .method("hello", &["String"], "String")]
///     }
/// }
/// ```
pub trait Interceptable: Send + Sync + 'static {
    fn type_descriptor() -> TypeDescriptor;

    /// 祖先类型的描述，包装时一并注册
    fn supertype_descriptors() -> Vec<TypeDescriptor> {
        Vec::new()
    }
}

/// 类型注册表
///
/// 记录类型层次与方法声明，供祖先类型匹配使用。
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: HashMap<String, Arc<TypeDescriptor>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册类型；同名且内容相同的重复注册会被忽略
    pub fn register(&mut self, descriptor: TypeDescriptor) -> AopResult<()> {
        match self.types.get(descriptor.name()) {
            Some(existing) if **existing == descriptor => Ok(()),
            Some(_) => Err(AopError::ConflictingType(descriptor.name().to_string())),
            None => {
                self.types
                    .insert(descriptor.name().to_string(), Arc::new(descriptor));
                Ok(())
            }
        }
    }

    /// 复制一份并追加 `descriptors`
    pub fn extended(
        &self,
        descriptors: impl IntoIterator<Item = TypeDescriptor>,
    ) -> AopResult<TypeRegistry> {
        let mut registry = self.clone();
        for descriptor in descriptors {
            registry.register(descriptor)?;
        }
        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Option<&TypeDescriptor> {
        self.types.get(name).map(Arc::as_ref)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// 全部祖先类型名（广度优先，不含自身，去重）
    ///
    /// 未注册的祖先也会出现在结果里，只是无法继续向上展开。
    pub fn ancestors(&self, name: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        let mut result = Vec::new();

        seen.insert(name.to_string());
        if let Some(descriptor) = self.get(name) {
            queue.extend(descriptor.supertypes().iter().cloned());
        }

        while let Some(current) = queue.pop_front() {
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(descriptor) = self.get(&current) {
                queue.extend(descriptor.supertypes().iter().cloned());
            }
            result.push(current);
        }

        result
    }

    /// 自身及全部祖先
    pub fn lineage(&self, name: &str) -> Vec<String> {
        let mut lineage = vec![name.to_string()];
        lineage.extend(self.ancestors(name));
        lineage
    }

    pub fn is_assignable(&self, from: &str, to: &str) -> bool {
        from == to || self.ancestors(from).iter().any(|a| a == to)
    }

    /// 类型自身（若为接口）及所有已注册的祖先接口
    pub fn interfaces_of(&self, name: &str) -> Vec<String> {
        self.lineage(name)
            .into_iter()
            .filter(|n| self.get(n).is_some_and(TypeDescriptor::is_interface))
            .collect()
    }

    /// `type_name` 自身是否声明了与 `signature` 同形的方法
    pub fn declares(&self, type_name: &str, signature: &MethodSignature) -> bool {
        self.get(type_name)
            .is_some_and(|descriptor| descriptor.declares(signature))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member_types() -> TypeRegistry {
        let mut registry = TypeRegistry::new();
        registry
            .register(
                TypeDescriptor::interface("hello.aop.member.MemberService")
                    .method("hello", &["String"], "String"),
            )
            .unwrap();
        registry
            .register(
                TypeDescriptor::class("hello.aop.member.MemberServiceImpl")
                    .implements("hello.aop.member.MemberService")
                    .method("hello", &["String"], "String")
                    .method("internal", &["String"], "String"),
            )
            .unwrap();
        registry
    }

    #[test]
    fn test_signature_display() {
        let sig = MethodSignature::new("hello.aop.member.MemberServiceImpl", "hello")
            .params(["java.lang.String"])
            .returns("java.lang.String");

        assert_eq!(
            sig.to_string(),
            "String hello.aop.member.MemberServiceImpl.hello(String)"
        );
        assert_eq!(
            sig.long_string(),
            "public String hello.aop.member.MemberServiceImpl.hello(String)"
        );
        assert_eq!(sig.key(), "hello(java.lang.String)");
    }

    #[test]
    fn test_same_shape_ignores_declaring_type() {
        let a = MethodSignature::new("a.A", "run").params(["int"]);
        let b = MethodSignature::new("b.B", "run").params(["int"]).returns("String");
        let c = MethodSignature::new("a.A", "run").params(["long"]);
        assert!(a.same_shape(&b));
        assert!(!a.same_shape(&c));
    }

    #[test]
    fn test_descriptor_rebinds_declaring_type() {
        let descriptor = TypeDescriptor::class("app.order.OrderService")
            .declare(MethodSignature::new("somewhere.Else", "orderItem").params(["String"]));
        assert_eq!(
            descriptor.methods()[0].declaring_type(),
            "app.order.OrderService"
        );
    }

    #[test]
    fn test_ancestors_and_lineage() {
        let registry = member_types();
        assert_eq!(
            registry.ancestors("hello.aop.member.MemberServiceImpl"),
            vec!["hello.aop.member.MemberService".to_string()]
        );
        assert!(registry.is_assignable(
            "hello.aop.member.MemberServiceImpl",
            "hello.aop.member.MemberService"
        ));
        assert!(!registry.is_assignable(
            "hello.aop.member.MemberService",
            "hello.aop.member.MemberServiceImpl"
        ));
        assert_eq!(
            registry.interfaces_of("hello.aop.member.MemberServiceImpl"),
            vec!["hello.aop.member.MemberService".to_string()]
        );
    }

    #[test]
    fn test_ancestor_cycle_terminates() {
        let mut registry = TypeRegistry::new();
        registry.register(TypeDescriptor::interface("x.A").extends("x.B")).unwrap();
        registry.register(TypeDescriptor::interface("x.B").extends("x.A")).unwrap();
        assert_eq!(registry.ancestors("x.A"), vec!["x.B".to_string()]);
    }

    #[test]
    fn test_conflicting_registration() {
        let mut registry = member_types();
        let same = TypeDescriptor::interface("hello.aop.member.MemberService")
            .method("hello", &["String"], "String");
        assert!(registry.register(same).is_ok());

        let different = TypeDescriptor::interface("hello.aop.member.MemberService");
        assert_eq!(
            registry.register(different),
            Err(AopError::ConflictingType(
                "hello.aop.member.MemberService".to_string()
            ))
        );
    }

    #[test]
    fn test_markers() {
        let sig = MethodSignature::new("app.exam.ExamRepository", "save")
            .marker("app.exam.annotation.Retry");
        assert!(sig.has_marker("Retry"));
        assert!(sig.has_marker("app.exam.annotation.Retry"));
        assert!(!sig.has_marker("Trace"));
    }
}
