//! execution 表达式中的各类模式
//!
//! - [`NamePattern`]：单段名称，`*` 匹配任意字符
//! - [`TypePattern`]：点号分隔的类型名，`.` 对应恰好一级，`..` 对应零或多级
//! - [`ParamPattern`]：参数列表，`()`、`(..)`、`(*)`、`(String, ..)`
//! - [`ExecutionPattern`]：`[可见性] 返回类型 [声明类型.]方法名(参数)`

use crate::error::{AopError, AopResult};
use crate::signature::{simple_name, MethodSignature, TypeRegistry, Visibility};
use regex::Regex;
use std::fmt;

/// 单段名称模式
#[derive(Debug, Clone)]
pub struct NamePattern {
    raw: String,
    matcher: NameMatcher,
}

#[derive(Debug, Clone)]
enum NameMatcher {
    Any,
    Exact,
    Glob(Regex),
}

impl NamePattern {
    pub fn parse(raw: &str) -> AopResult<Self> {
        if raw.is_empty() {
            return Err(AopError::malformed(raw, "empty name"));
        }
        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_alphanumeric() || matches!(c, '_' | '$' | '*' | '[' | ']')))
        {
            return Err(AopError::malformed(
                raw,
                format!("unexpected character '{}' in name", bad),
            ));
        }

        let matcher = if raw.chars().all(|c| c == '*') {
            NameMatcher::Any
        } else if !raw.contains('*') {
            NameMatcher::Exact
        } else {
            let body = raw
                .split('*')
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(".*");
            let regex = Regex::new(&format!("^{}$", body))
                .map_err(|e| AopError::malformed(raw, e.to_string()))?;
            NameMatcher::Glob(regex)
        };

        Ok(Self {
            raw: raw.to_string(),
            matcher,
        })
    }

    pub fn any() -> Self {
        Self {
            raw: "*".to_string(),
            matcher: NameMatcher::Any,
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self.matcher, NameMatcher::Any)
    }

    pub fn matches(&self, name: &str) -> bool {
        match &self.matcher {
            NameMatcher::Any => true,
            NameMatcher::Exact => self.raw == name,
            NameMatcher::Glob(regex) => regex.is_match(name),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

#[derive(Debug, Clone)]
enum TypeElement {
    Segment(NamePattern),
    Ellipsis,
}

/// 类型模式
///
/// 只有一段的模式（`String`、`*Service`）只匹配类型的简单名，
/// `*` 不会越过包名中的 `.`；带点号的模式按完整限定名逐级匹配。
/// 末尾的 `..` 等价于 `..*`。
#[derive(Debug, Clone)]
pub struct TypePattern {
    raw: String,
    elements: Vec<TypeElement>,
}

impl TypePattern {
    pub fn parse(raw: &str) -> AopResult<Self> {
        let raw = raw.trim();
        let (body, trailing_ellipsis) = match raw.strip_suffix("..") {
            Some(body) => (body, true),
            None => (raw, false),
        };

        if body.is_empty() {
            return Err(AopError::malformed(raw, "empty type pattern"));
        }
        if body.starts_with('.') || body.ends_with('.') {
            return Err(AopError::malformed(raw, "dangling '.' in type pattern"));
        }

        let mut elements = Vec::new();
        for piece in body.split('.') {
            if piece.is_empty() {
                if matches!(elements.last(), Some(TypeElement::Ellipsis)) {
                    return Err(AopError::malformed(raw, "'...' is not a valid separator"));
                }
                elements.push(TypeElement::Ellipsis);
            } else {
                let segment = NamePattern::parse(piece)
                    .map_err(|_| AopError::malformed(raw, format!("bad segment '{}'", piece)))?;
                elements.push(TypeElement::Segment(segment));
            }
        }
        if trailing_ellipsis {
            elements.push(TypeElement::Ellipsis);
            elements.push(TypeElement::Segment(NamePattern::any()));
        }

        Ok(Self {
            raw: raw.to_string(),
            elements,
        })
    }

    pub fn any() -> Self {
        Self {
            raw: "*".to_string(),
            elements: vec![TypeElement::Segment(NamePattern::any())],
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self.elements.as_slice(), [TypeElement::Segment(p)] if p.is_any())
    }

    pub fn matches(&self, type_name: &str) -> bool {
        if let [TypeElement::Segment(pattern)] = self.elements.as_slice() {
            return pattern.matches(simple_name(type_name));
        }
        let names: Vec<&str> = type_name.split('.').collect();
        match_type_elements(&self.elements, &names)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

fn match_type_elements(pattern: &[TypeElement], names: &[&str]) -> bool {
    match pattern.split_first() {
        None => names.is_empty(),
        Some((TypeElement::Ellipsis, rest)) => {
            (0..=names.len()).any(|skip| match_type_elements(rest, &names[skip..]))
        }
        Some((TypeElement::Segment(segment), rest)) => match names.split_first() {
            Some((name, remaining)) => {
                segment.matches(name) && match_type_elements(rest, remaining)
            }
            None => false,
        },
    }
}

#[derive(Debug, Clone)]
enum ParamElement {
    /// `*`：恰好一个任意类型的参数
    AnyOne,
    /// `..`：零或多个任意参数
    Rest,
    Type(TypePattern),
}

/// 参数列表模式
#[derive(Debug, Clone)]
pub struct ParamPattern {
    raw: String,
    elements: Vec<ParamElement>,
}

impl ParamPattern {
    /// 解析参数模式，括号可有可无：`(String, ..)` 与 `String, ..` 等价
    pub fn parse(raw: &str) -> AopResult<Self> {
        let trimmed = raw.trim();
        let inner = match trimmed.strip_prefix('(') {
            Some(rest) => rest
                .strip_suffix(')')
                .ok_or_else(|| AopError::malformed(raw, "unbalanced parameter list"))?,
            None => trimmed,
        };
        if inner.contains('(') || inner.contains(')') {
            return Err(AopError::malformed(raw, "nested parentheses in parameter list"));
        }

        let inner = inner.trim();
        let mut elements = Vec::new();
        if !inner.is_empty() {
            for piece in inner.split(',') {
                let element = match piece.trim() {
                    "" => return Err(AopError::malformed(raw, "empty parameter")),
                    ".." => ParamElement::Rest,
                    "*" => ParamElement::AnyOne,
                    other => ParamElement::Type(TypePattern::parse(other).map_err(|_| {
                        AopError::malformed(raw, format!("bad parameter type '{}'", other))
                    })?),
                };
                elements.push(element);
            }
        }

        Ok(Self {
            raw: format!("({})", inner),
            elements,
        })
    }

    pub fn any() -> Self {
        Self {
            raw: "(..)".to_string(),
            elements: vec![ParamElement::Rest],
        }
    }

    pub fn matches(&self, params: &[String]) -> bool {
        match_params(&self.elements, params)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

fn match_params(pattern: &[ParamElement], params: &[String]) -> bool {
    match pattern.split_first() {
        None => params.is_empty(),
        Some((ParamElement::Rest, rest)) => {
            (0..=params.len()).any(|skip| match_params(rest, &params[skip..]))
        }
        Some((element, rest)) => match params.split_first() {
            Some((param, remaining)) => {
                let head = match element {
                    ParamElement::AnyOne => true,
                    ParamElement::Type(pattern) => pattern.matches(param),
                    ParamElement::Rest => unreachable!("handled above"),
                };
                head && match_params(rest, remaining)
            }
            None => false,
        },
    }
}

/// `execution(...)` 的主体
#[derive(Debug, Clone)]
pub struct ExecutionPattern {
    raw: String,
    visibility: Option<Visibility>,
    return_type: TypePattern,
    declaring_type: Option<TypePattern>,
    method: NamePattern,
    params: ParamPattern,
}

impl ExecutionPattern {
    /// 由三个子模式构造，返回类型与可见性不限
    pub fn new(type_pattern: &str, method_pattern: &str, param_pattern: &str) -> AopResult<Self> {
        let declaring_type = match type_pattern.trim() {
            "" => None,
            other => Some(TypePattern::parse(other)?),
        };
        let method = NamePattern::parse(method_pattern.trim())?;
        let params = ParamPattern::parse(param_pattern)?;

        let raw = match &declaring_type {
            // `app.order..` 写成 `app.order..*`，否则拼出的 `...` 无法再解析
            Some(tp) if tp.as_str().ends_with("..") => {
                format!("* {}*.{}{}", tp.as_str(), method.as_str(), params.as_str())
            }
            Some(tp) => format!("* {}.{}{}", tp.as_str(), method.as_str(), params.as_str()),
            None => format!("* {}{}", method.as_str(), params.as_str()),
        };

        Ok(Self {
            raw,
            visibility: None,
            return_type: TypePattern::any(),
            declaring_type,
            method,
            params,
        })
    }

    /// 解析 `execution(...)` 括号内的文本，例如 `public String a.b.Type.hello(String)`
    pub fn parse(body: &str) -> AopResult<Self> {
        let body = body.trim();
        let open = body
            .find('(')
            .ok_or_else(|| AopError::malformed(body, "missing parameter list"))?;
        if !body.ends_with(')') {
            return Err(AopError::malformed(body, "parameter list must close the pattern"));
        }

        let params = ParamPattern::parse(&body[open..])
            .map_err(|_| AopError::malformed(body, "invalid parameter list"))?;

        let tokens: Vec<&str> = body[..open].split_whitespace().collect();
        let (visibility, return_token, name_token) = match tokens.as_slice() {
            [ret, name] => (None, *ret, *name),
            [vis, ret, name] => {
                let visibility = vis.parse::<Visibility>().map_err(|_| {
                    AopError::malformed(body, format!("unknown modifier '{}'", vis))
                })?;
                (Some(visibility), *ret, *name)
            }
            [_] => return Err(AopError::malformed(body, "missing return type pattern")),
            [] => return Err(AopError::malformed(body, "missing method pattern")),
            _ => return Err(AopError::malformed(body, "too many tokens before parameters")),
        };

        let return_type = TypePattern::parse(return_token)
            .map_err(|_| AopError::malformed(body, "invalid return type pattern"))?;

        let (declaring_type, method) = match name_token.rsplit_once('.') {
            Some((type_part, method_part)) => {
                // "a.b..*" 拆开后类型部分以单个 '.' 结尾，它原本属于 ".."
                let type_part = if type_part.ends_with('.') {
                    format!("{}.", type_part)
                } else {
                    type_part.to_string()
                };
                let declaring_type = TypePattern::parse(&type_part)
                    .map_err(|_| AopError::malformed(body, "invalid declaring type pattern"))?;
                (Some(declaring_type), method_part)
            }
            None => (None, name_token),
        };
        let method = NamePattern::parse(method)
            .map_err(|_| AopError::malformed(body, "invalid method name pattern"))?;

        Ok(Self {
            raw: body.to_string(),
            visibility,
            return_type,
            declaring_type,
            method,
            params,
        })
    }

    /// 声明类型匹配规则：
    /// 1. 签名的声明类型本身匹配；或
    /// 2. 某个祖先类型匹配，并且该祖先自己声明了同形方法。
    ///
    /// 只存在于实现类上的方法，不会因为实现类可以赋值给祖先类型而被匹配。
    pub fn matches(&self, signature: &MethodSignature, types: &TypeRegistry) -> bool {
        if let Some(visibility) = self.visibility {
            if signature.get_visibility() != visibility {
                return false;
            }
        }
        if !self.method.matches(signature.name())
            || !self.params.matches(signature.param_types())
            || !self.return_type.matches(signature.return_type())
        {
            return false;
        }

        match &self.declaring_type {
            None => true,
            Some(pattern) => {
                pattern.matches(signature.declaring_type())
                    || types
                        .ancestors(signature.declaring_type())
                        .iter()
                        .any(|ancestor| {
                            pattern.matches(ancestor) && types.declares(ancestor, signature)
                        })
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for ExecutionPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "execution({})", self.raw)
    }
}
