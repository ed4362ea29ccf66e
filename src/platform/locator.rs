//! Locating the signature and n-param functions inside player script
//!
//! Each function is found by an ordered list of independent strategies that
//! recover its name. The definition is then cut out with a bracket matcher and
//! the helper objects and lookup tables it references are pulled in, so the
//! resulting source runs on its own.

use crate::error::{FunctionKind, ResolveError};
use crate::utils::js::{balanced_slice, find_matching_bracket, snippet, string_literal_end};
use regex::Regex;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use tracing::debug;

/// Upper bound on helper definitions pulled in for one function
const MAX_HELPERS: usize = 32;

/// Identifiers that never name a helper defined by the player
const BUILTINS: &[&str] = &[
    "arguments", "Array", "Date", "decodeURIComponent", "encodeURIComponent", "Error",
    "Function", "Infinity", "isNaN", "JSON", "Math", "NaN", "Number", "Object", "parseFloat",
    "parseInt", "Promise", "RegExp", "String", "Symbol", "this", "undefined", "window",
];

/// Ways of finding the name of the signature function
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureStrategy {
    /// `c&&(c=NAME(decodeURIComponent(c))`
    GuardedDecodeCall,
    /// `m=NAME(decodeURIComponent(h.s))`
    DecodeCall,
    /// `c&&d.set(b,encodeURIComponent(NAME(`
    EncodeSetCall,
    /// `.sig||NAME(`
    SigFallbackCall,
    /// `NAME=function(a){a=a.split("")`
    SplitAssignment,
    /// `NAME=function(x){x=x.split("");` for any parameter name
    SplitAnyParam,
    /// `function NAME(x){x=x.split("")`
    SplitDeclaration,
    /// Caller supplied regex whose first group is the name
    Custom { label: String, pattern: String },
}

impl SignatureStrategy {
    /// Default strategy order
    pub fn defaults() -> Vec<SignatureStrategy> {
        vec![
            SignatureStrategy::GuardedDecodeCall,
            SignatureStrategy::DecodeCall,
            SignatureStrategy::EncodeSetCall,
            SignatureStrategy::SigFallbackCall,
            SignatureStrategy::SplitAssignment,
            SignatureStrategy::SplitAnyParam,
            SignatureStrategy::SplitDeclaration,
        ]
    }

    pub fn label(&self) -> &str {
        match self {
            SignatureStrategy::GuardedDecodeCall => "guarded-decode-call",
            SignatureStrategy::DecodeCall => "decode-call",
            SignatureStrategy::EncodeSetCall => "encode-set-call",
            SignatureStrategy::SigFallbackCall => "sig-fallback-call",
            SignatureStrategy::SplitAssignment => "split-assignment",
            SignatureStrategy::SplitAnyParam => "split-any-param",
            SignatureStrategy::SplitDeclaration => "split-declaration",
            SignatureStrategy::Custom { label, .. } => label,
        }
    }

    fn pattern(&self) -> &str {
        match self {
            SignatureStrategy::GuardedDecodeCall => {
                r"\bc&&\(c=([a-zA-Z0-9$]{2,})\(decodeURIComponent\(c\)\)"
            }
            SignatureStrategy::DecodeCall => {
                r"\bm=([a-zA-Z0-9$]{2,})\(decodeURIComponent\(h\.s\)\)"
            }
            SignatureStrategy::EncodeSetCall => {
                r"\b[cs]\s*&&\s*[adf]\.set\([^,]+\s*,\s*encodeURIComponent\s*\(\s*([a-zA-Z0-9$]+)\("
            }
            SignatureStrategy::SigFallbackCall => r"\.sig\|\|([a-zA-Z0-9$]+)\(",
            SignatureStrategy::SplitAssignment => {
                r#"(?:^|[^a-zA-Z0-9$])([a-zA-Z0-9$]{2,})\s*=\s*function\(\s*a\s*\)\s*\{\s*a\s*=\s*a\.split\(\s*""\s*\)"#
            }
            SignatureStrategy::SplitAnyParam => {
                r#"([\w$]+)\s*=\s*function\((\w+)\)\{\s*(\w+)=\s*(\w+)\.split\(""\)\s*;"#
            }
            SignatureStrategy::SplitDeclaration => {
                r#"function\s+([a-zA-Z0-9$]{2,})\s*\(\s*(\w+)\s*\)\s*\{\s*(\w+)\s*=\s*(\w+)\.split\(\s*""\s*\)"#
            }
            SignatureStrategy::Custom { pattern, .. } => pattern,
        }
    }

    /// Find the function name this strategy points at
    fn find_name(&self, script: &str) -> Result<Option<String>, ResolveError> {
        let regex = Regex::new(self.pattern())?;
        match self {
            // The parameter must be the one split, which needs a backreference check
            SignatureStrategy::SplitAnyParam | SignatureStrategy::SplitDeclaration => {
                Ok(regex.captures_iter(script).find_map(|caps| {
                    let param = caps.get(2)?.as_str();
                    let same = caps.get(3)?.as_str() == param && caps.get(4)?.as_str() == param;
                    same.then(|| caps[1].to_string())
                }))
            }
            _ => Ok(regex
                .captures(script)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string())),
        }
    }
}

/// Ways of finding the name of the n-param function
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NParamStrategy {
    /// `.get("n"))&&(b=NAME[IDX](b)`
    GetNCall,
    /// `(b=String.fromCharCode(110),c=a.get(b))&&(c=NAME[IDX](c)`
    CharCodeCall,
    /// `NAME=function(a){var b=a.split("")...catch(d){return"enhanced_except_"+a}...`
    EnhancedExceptBody,
    /// Caller supplied regex: group 1 is the name, optional group 2 an array index
    Custom { label: String, pattern: String },
}

impl NParamStrategy {
    /// Default strategy order
    pub fn defaults() -> Vec<NParamStrategy> {
        vec![
            NParamStrategy::GetNCall,
            NParamStrategy::CharCodeCall,
            NParamStrategy::EnhancedExceptBody,
        ]
    }

    pub fn label(&self) -> &str {
        match self {
            NParamStrategy::GetNCall => "get-n-call",
            NParamStrategy::CharCodeCall => "char-code-call",
            NParamStrategy::EnhancedExceptBody => "enhanced-except-body",
            NParamStrategy::Custom { label, .. } => label,
        }
    }

    fn pattern(&self) -> &str {
        match self {
            NParamStrategy::GetNCall => {
                r#"\.get\("n"\)\)&&\([a-zA-Z0-9$_]=([a-zA-Z0-9$_]+)(?:\[(\d+)\])?\([a-zA-Z0-9$_]\)"#
            }
            NParamStrategy::CharCodeCall => {
                r"\([a-zA-Z0-9$_]=String\.fromCharCode\(110\),[a-zA-Z0-9$_]=[a-zA-Z0-9$_]\.get\([a-zA-Z0-9$_]\)\)&&\([a-zA-Z0-9$_]=([a-zA-Z0-9$_]+)(?:\[(\d+)\])?\([a-zA-Z0-9$_]\)"
            }
            NParamStrategy::EnhancedExceptBody => {
                r#"(?:^|[^a-zA-Z0-9$_.])([a-zA-Z0-9$_]{2,})\s*=\s*function\(\s*[a-zA-Z0-9$_]+\s*\)\s*\{\s*var\s+[a-zA-Z0-9$_]+\s*=\s*(?:String\.prototype\.split\.call\(\s*[a-zA-Z0-9$_]+\s*,\s*""\s*\)|[a-zA-Z0-9$_]+\.split\(\s*""\s*\))"#
            }
            NParamStrategy::Custom { pattern, .. } => pattern,
        }
    }

    fn find_name(&self, script: &str) -> Result<Option<String>, ResolveError> {
        let regex = Regex::new(self.pattern())?;

        if let NParamStrategy::EnhancedExceptBody = self {
            for caps in regex.captures_iter(script) {
                let whole = caps.get(0).map(|m| m.end()).unwrap_or(0);
                let open = match script[..whole].rfind('{') {
                    Some(open) => open,
                    None => continue,
                };
                if let Some(body) = balanced_slice(script, open) {
                    if body.contains("enhanced_except_") || body.contains("_w8_") {
                        return Ok(Some(caps[1].to_string()));
                    }
                }
            }
            return Ok(None);
        }

        let caps = match regex.captures(script) {
            Some(caps) => caps,
            None => return Ok(None),
        };
        let name = match caps.get(1) {
            Some(name) => name.as_str(),
            None => return Ok(None),
        };
        match caps.get(2).and_then(|idx| idx.as_str().parse::<usize>().ok()) {
            Some(index) => resolve_array_entry(script, name, index),
            None => Ok(Some(name.to_string())),
        }
    }
}

/// Source of one located function, ready for the sandbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSource {
    pub kind: FunctionKind,
    /// Name the function is bound to in `code`
    pub name: String,
    /// Helper definitions followed by the function definition
    pub code: String,
    /// Names of the helpers included in `code`
    pub helpers: Vec<String>,
    /// Label of the strategy that found the name
    pub strategy: String,
}

impl FunctionSource {
    /// Truncated code for diagnostics
    pub fn snippet(&self) -> String {
        snippet(&self.code, 160)
    }
}

/// No strategy located a function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocateFailure {
    pub function: FunctionKind,
    /// Every strategy tried, in order, with the reason it did not apply
    pub attempted: Vec<String>,
}

impl LocateFailure {
    pub fn into_error(self, version: &str) -> ResolveError {
        ResolveError::ExtractionFailed {
            version: version.to_string(),
            function: self.function,
            attempted: self.attempted.join(", "),
        }
    }
}

impl fmt::Display for LocateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "no {} function found (tried: {})",
            self.function,
            self.attempted.join(", ")
        )
    }
}

/// Locates both cipher functions with configurable strategy lists
#[derive(Debug, Clone)]
pub struct ScriptLocator {
    signature_strategies: Vec<SignatureStrategy>,
    n_param_strategies: Vec<NParamStrategy>,
}

impl Default for ScriptLocator {
    fn default() -> Self {
        Self {
            signature_strategies: SignatureStrategy::defaults(),
            n_param_strategies: NParamStrategy::defaults(),
        }
    }
}

impl ScriptLocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the signature strategy list
    pub fn with_signature_strategies(mut self, strategies: Vec<SignatureStrategy>) -> Self {
        self.signature_strategies = strategies;
        self
    }

    /// Replace the n-param strategy list
    pub fn with_n_param_strategies(mut self, strategies: Vec<NParamStrategy>) -> Self {
        self.n_param_strategies = strategies;
        self
    }

    /// Try a caller supplied signature pattern before the built-in ones
    pub fn prepend_signature_pattern(mut self, label: &str, pattern: &str) -> Self {
        self.signature_strategies.insert(
            0,
            SignatureStrategy::Custom {
                label: label.to_string(),
                pattern: pattern.to_string(),
            },
        );
        self
    }

    /// Try a caller supplied n-param pattern before the built-in ones
    pub fn prepend_n_param_pattern(mut self, label: &str, pattern: &str) -> Self {
        self.n_param_strategies.insert(
            0,
            NParamStrategy::Custom {
                label: label.to_string(),
                pattern: pattern.to_string(),
            },
        );
        self
    }

    pub fn signature_strategies(&self) -> &[SignatureStrategy] {
        &self.signature_strategies
    }

    pub fn n_param_strategies(&self) -> &[NParamStrategy] {
        &self.n_param_strategies
    }

    /// Locate the signature function
    pub fn locate_signature(&self, script: &str) -> Result<FunctionSource, LocateFailure> {
        let mut attempted = Vec::new();
        for strategy in &self.signature_strategies {
            let outcome = strategy
                .find_name(script)
                .and_then(|name| match name {
                    Some(name) => extract_function(script, &name, FunctionKind::Signature),
                    None => Ok(None),
                });
            match outcome {
                Ok(Some(mut source)) => {
                    debug!(
                        "Located signature function {} via {}",
                        source.name,
                        strategy.label()
                    );
                    source.strategy = strategy.label().to_string();
                    return Ok(source);
                }
                Ok(None) => attempted.push(strategy.label().to_string()),
                Err(e) => attempted.push(format!("{} ({})", strategy.label(), e)),
            }
        }
        Err(LocateFailure {
            function: FunctionKind::Signature,
            attempted,
        })
    }

    /// Locate the n-param function
    pub fn locate_n_param(&self, script: &str) -> Result<FunctionSource, LocateFailure> {
        let mut attempted = Vec::new();
        for strategy in &self.n_param_strategies {
            let outcome = strategy.find_name(script).and_then(|name| match name {
                Some(name) => extract_function(script, &name, FunctionKind::NParam),
                None => Ok(None),
            });
            match outcome {
                Ok(Some(mut source)) => {
                    debug!(
                        "Located n-param function {} via {}",
                        source.name,
                        strategy.label()
                    );
                    source.strategy = strategy.label().to_string();
                    return Ok(source);
                }
                Ok(None) => attempted.push(strategy.label().to_string()),
                Err(e) => attempted.push(format!("{} ({})", strategy.label(), e)),
            }
        }
        Err(LocateFailure {
            function: FunctionKind::NParam,
            attempted,
        })
    }
}

/// Look up entry `index` of `var NAME=[a,b,c]`
fn resolve_array_entry(script: &str, name: &str, index: usize) -> Result<Option<String>, ResolveError> {
    let array_regex = Regex::new(&format!(
        r"var\s+{}\s*=\s*\[(.+?)\][;,]",
        regex::escape(name)
    ))?;
    Ok(array_regex.captures(script).and_then(|caps| {
        caps[1]
            .split(',')
            .nth(index)
            .map(|entry| entry.trim().to_string())
            .filter(|entry| !entry.is_empty())
    }))
}

struct FunctionDefinition {
    code: String,
    params: Vec<String>,
    body: String,
}

/// Cut out `NAME=function(..){..}` or `function NAME(..){..}`
fn find_function_definition(
    script: &str,
    name: &str,
) -> Result<Option<FunctionDefinition>, ResolveError> {
    let escaped = regex::escape(name);
    let assignment = Regex::new(&format!(
        r"(?:^|[^a-zA-Z0-9$_.]){}\s*=\s*function\s*\(([^)]*)\)\s*\{{",
        escaped
    ))?;
    let declaration = Regex::new(&format!(r"function\s+{}\s*\(([^)]*)\)\s*\{{", escaped))?;

    for (regex, is_declaration) in [(&assignment, false), (&declaration, true)] {
        for caps in regex.captures_iter(script) {
            let (whole, params) = match (caps.get(0), caps.get(1)) {
                (Some(whole), Some(params)) => (whole, params.as_str()),
                _ => continue,
            };
            let body = match balanced_slice(script, whole.end() - 1) {
                Some(body) => body,
                None => continue,
            };
            let params: Vec<String> = params
                .split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect();
            let code = if is_declaration {
                format!("function {}({}){}", name, params.join(","), body)
            } else {
                format!("var {}=function({}){};", name, params.join(","), body)
            };
            return Ok(Some(FunctionDefinition {
                code,
                params,
                body: body.to_string(),
            }));
        }
    }
    Ok(None)
}

/// Fallback for n-functions whose body the bracket matcher cannot cut
fn find_n_function_by_shape(
    script: &str,
    name: &str,
) -> Result<Option<FunctionDefinition>, ResolveError> {
    let shape = Regex::new(&format!(
        r#"(?s){}\s*=\s*function\s*\(([^)]*)\)\s*(\{{.*?\}}\s*return [\w$]+?\.join\(""\)\s*\}});"#,
        regex::escape(name)
    ))?;
    Ok(shape.captures(script).map(|caps| {
        let params: Vec<String> = caps[1]
            .split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        let body = caps[2].to_string();
        FunctionDefinition {
            code: format!("var {}=function({}){};", name, params.join(","), body),
            params,
            body,
        }
    }))
}

/// Remove `if(typeof X==="undefined")return a;` guards that short-circuit outside the player
fn strip_undefined_guards(code: &str, param: &str) -> Result<String, ResolveError> {
    let guard = Regex::new(&format!(
        r#";\s*if\s*\(\s*typeof\s+[a-zA-Z0-9_$]+\s*===?\s*(?:"undefined"|'undefined')\s*\)\s*return\s+{}\s*;"#,
        regex::escape(param)
    ))?;
    Ok(guard.replace_all(code, ";").into_owned())
}

fn extract_function(
    script: &str,
    name: &str,
    kind: FunctionKind,
) -> Result<Option<FunctionSource>, ResolveError> {
    let mut definition = find_function_definition(script, name)?;
    if definition.is_none() && kind == FunctionKind::NParam {
        definition = find_n_function_by_shape(script, name)?;
    }
    let mut definition = match definition {
        Some(definition) => definition,
        None => {
            debug!("Found {} function name {} but not its body", kind, name);
            return Ok(None);
        }
    };

    if kind == FunctionKind::NParam {
        if let Some(param) = definition.params.first() {
            definition.code = strip_undefined_guards(&definition.code, param)?;
            definition.body = strip_undefined_guards(&definition.body, param)?;
        }
    }

    let mut exclude: HashSet<String> = definition.params.iter().cloned().collect();
    exclude.insert(name.to_string());
    let helpers = collect_helpers(script, &definition.body, exclude)?;

    let mut code = String::new();
    let mut helper_names = Vec::with_capacity(helpers.len());
    // Deepest dependencies first
    for (helper_name, helper_code) in helpers.into_iter().rev() {
        code.push_str(&helper_code);
        helper_names.push(helper_name);
    }
    code.push_str(&definition.code);

    debug!(
        "Extracted {} function {} ({} chars, helpers: {:?})",
        kind,
        name,
        code.len(),
        helper_names
    );

    Ok(Some(FunctionSource {
        kind,
        name: name.to_string(),
        code,
        helpers: helper_names,
        strategy: String::new(),
    }))
}

/// Find helper objects, functions and tables referenced from `body`, transitively
fn collect_helpers(
    script: &str,
    body: &str,
    mut seen: HashSet<String>,
) -> Result<Vec<(String, String)>, ResolveError> {
    let reference = Regex::new(
        r"(?:^|[^a-zA-Z0-9$_.])([a-zA-Z_$][a-zA-Z0-9_$]+)\s*(?:\.\s*[a-zA-Z_$][a-zA-Z0-9_$]*\s*\(|\[)",
    )?;

    let mut helpers = Vec::new();
    let mut pending = VecDeque::from([body.to_string()]);
    while let Some(text) = pending.pop_front() {
        for caps in reference.captures_iter(&text) {
            let ident = &caps[1];
            if BUILTINS.contains(&ident) || !seen.insert(ident.to_string()) {
                continue;
            }
            if helpers.len() >= MAX_HELPERS {
                return Ok(helpers);
            }
            if let Some(value) = find_value_definition(script, ident)? {
                let definition = format!("var {}={};", ident, value);
                pending.push_back(value);
                helpers.push((ident.to_string(), definition));
            }
        }
    }
    Ok(helpers)
}

/// Value of `IDENT={..}`, `IDENT=[..]`, `IDENT="..".split(..)` or `IDENT=function(..){..}`
fn find_value_definition(script: &str, ident: &str) -> Result<Option<String>, ResolveError> {
    let assignment = Regex::new(&format!(
        r"(?:^|[^a-zA-Z0-9$_.])(?:var\s+|let\s+|const\s+)?{}\s*=\s*",
        regex::escape(ident)
    ))?;

    for m in assignment.find_iter(script) {
        let start = m.end();
        let rest = &script[start..];
        let value = match rest.as_bytes().first() {
            Some(b'{') | Some(b'[') => balanced_slice(script, start),
            Some(b'"') | Some(b'\'') => string_value(script, start),
            _ if rest.starts_with("function") => function_value(script, start),
            _ => None,
        };
        if let Some(value) = value {
            return Ok(Some(value.to_string()));
        }
    }
    Ok(None)
}

/// A string literal, optionally followed by `.split(..)`
fn string_value(script: &str, start: usize) -> Option<&str> {
    let end = string_literal_end(script, start)?;
    let after = &script[end + 1..];
    if after.starts_with(".split(") {
        let open = end + 1 + ".split".len();
        let close = find_matching_bracket(script, open)?;
        return script.get(start..=close);
    }
    script.get(start..=end)
}

/// An anonymous `function(..){..}` expression
fn function_value(script: &str, start: usize) -> Option<&str> {
    let open_paren = start + script[start..].find('(')?;
    let close_paren = find_matching_bracket(script, open_paren)?;
    let open_brace = close_paren + 1 + script[close_paren + 1..].find('{')?;
    let close_brace = find_matching_bracket(script, open_brace)?;
    script.get(start..=close_brace)
}
