use std::borrow::Cow;
use std::ops::Range;

use cedar_policy::{ParseErrors, PolicySet};
use tracing::debug;

use crate::cedar::{ActionScope, CedarPolicy, CedarUid, cedar_string};
use crate::error::PolicyError;
use crate::types::Entity;

const ACTION_TYPE: &str = "Action";

/// Id prefix of an `Action` uid that stands in for an action of another type.
const CUSTOM_ACTION: &str = "__custom_action__:";

/// Compile Cedar policy text into a `PolicySet`.
///
/// Any Cedar parse errors are mapped into `PolicyError::ParseError`.
///
/// Cedar only accepts `Action` uids in the action scope. Actions of other
/// types, e.g. `PhotoOp::"view"`, are compiled as `Action` uids whose id
/// carries the original uid.
///
/// Example:
/// ```rust
/// use policy_bridge::compile_policy;
/// let policy_text = r#"
///     permit (principal, action, resource);
///     forbid  (principal == User::"evil", action, resource);
/// "#;
/// let set = compile_policy(policy_text).unwrap();
/// assert!(set.num_of_policies() >= 1);
/// ```
pub fn compile_policy(text: &str) -> Result<PolicySet, PolicyError> {
    encode_custom_actions(text)
        .parse()
        .map_err(|e: ParseErrors| PolicyError::ParseError(e.to_string()))
}

/// Parse Cedar text into policies and templates in source order.
///
/// Static policies and templates are numbered together by the Cedar parser
/// (`policy0`, `policy1`, ...), which is the order returned here.
pub fn load_cedar_policies(text: &str) -> Result<Vec<CedarPolicy>, PolicyError> {
    let set = compile_policy(text)?;
    let mut loaded = Vec::new();
    for policy in set.policies() {
        let json = policy
            .to_json()
            .map_err(|e| PolicyError::ParseError(e.to_string()))?;
        loaded.push((policy.id().to_string(), decode(json)?));
    }
    for template in set.templates() {
        let json = template
            .to_json()
            .map_err(|e| PolicyError::ParseError(e.to_string()))?;
        loaded.push((template.id().to_string(), decode(json)?));
    }
    loaded.sort_by_key(|(id, _)| source_index(id));
    debug!(
        event = "CedarLoad",
        phase = "parsed",
        policies = set.num_of_policies(),
        templates = set.num_of_templates(),
    );
    Ok(loaded.into_iter().map(|(_, policy)| policy).collect())
}

fn decode(json: serde_json::Value) -> Result<CedarPolicy, PolicyError> {
    let mut policy = CedarPolicy::from_json(json)?;
    match &mut policy.action {
        ActionScope::All => {}
        ActionScope::Eq { entity } => restore_action(entity)?,
        ActionScope::In { entity, entities } => {
            for uid in entity.iter_mut().chain(entities.iter_mut().flatten()) {
                restore_action(uid)?;
            }
        }
    }
    Ok(policy)
}

fn restore_action(uid: &mut CedarUid) -> Result<(), PolicyError> {
    if uid.type_name != ACTION_TYPE {
        return Ok(());
    }
    let Some(original) = uid.id.strip_prefix(CUSTOM_ACTION) else {
        return Ok(());
    };
    match original.parse::<Entity>()? {
        Entity::Equals { types, id, .. } if !types.is_empty() => {
            *uid = CedarUid::new(types.join("::"), id);
            Ok(())
        }
        other => Err(PolicyError::InvalidEntity(format!(
            "'{other}' is not an action uid"
        ))),
    }
}

/// Rewrite action-scope uids of types other than `Action` into stand-in
/// `Action` uids.
fn encode_custom_actions(text: &str) -> Cow<'_, str> {
    let spans = custom_action_spans(text);
    if spans.is_empty() {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len() + spans.len() * 32);
    let mut copied = 0;
    for span in spans {
        out.push_str(&text[copied..span.start]);
        out.push_str(ACTION_TYPE);
        out.push_str("::");
        out.push_str(&cedar_string(&format!("{CUSTOM_ACTION}{}", &text[span.clone()])));
        copied = span.end;
    }
    out.push_str(&text[copied..]);
    Cow::Owned(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Ident,
    Str,
    PathSep,
    Punct(u8),
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    span: Range<usize>,
}

/// A coarse Cedar tokenizer: identifiers, string literals, `::` and single
/// punctuation bytes. Comments and whitespace are dropped.
fn tokenize(text: &str) -> Vec<Token> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;
    while let Some(&b) = bytes.get(pos) {
        let start = pos;
        let kind = match b {
            b if b.is_ascii_whitespace() => {
                pos += 1;
                continue;
            }
            b'/' if bytes.get(pos + 1) == Some(&b'/') => {
                while bytes.get(pos).is_some_and(|&b| b != b'\n') {
                    pos += 1;
                }
                continue;
            }
            b'"' => {
                pos += 1;
                while let Some(&b) = bytes.get(pos) {
                    pos += if b == b'\\' { 2 } else { 1 };
                    if b == b'"' {
                        break;
                    }
                }
                pos = pos.min(bytes.len());
                TokenKind::Str
            }
            b':' if bytes.get(pos + 1) == Some(&b':') => {
                pos += 2;
                TokenKind::PathSep
            }
            b if b == b'_' || b.is_ascii_alphabetic() => {
                while bytes
                    .get(pos)
                    .is_some_and(|&b| b == b'_' || b.is_ascii_alphanumeric())
                {
                    pos += 1;
                }
                TokenKind::Ident
            }
            b => {
                pos += 1;
                TokenKind::Punct(b)
            }
        };
        tokens.push(Token {
            kind,
            span: start..pos,
        });
    }
    tokens
}

/// Spans of uids in `action` scope constraints whose type does not end in `Action`.
fn custom_action_spans(text: &str) -> Vec<Range<usize>> {
    let tokens = tokenize(text);
    let mut spans = Vec::new();
    let mut i = 0;
    while i + 1 < tokens.len() {
        let is_head = tokens[i].kind == TokenKind::Ident
            && matches!(word(text, &tokens[i]), "permit" | "forbid")
            && tokens[i + 1].kind == TokenKind::Punct(b'(')
            && (i == 0 || tokens[i - 1].kind != TokenKind::Punct(b'.'));
        if !is_head {
            i += 1;
            continue;
        }
        // scope elements run to the ',' or ')' that closes them at depth 1
        let mut depth = 1;
        let mut element_start = i + 2;
        let mut j = i + 2;
        while j < tokens.len() && depth > 0 {
            match tokens[j].kind {
                TokenKind::Punct(b'(' | b'[') => depth += 1,
                TokenKind::Punct(b')' | b']') => depth -= 1,
                _ => {}
            }
            let closes = depth == 0 || (depth == 1 && tokens[j].kind == TokenKind::Punct(b','));
            if closes {
                let element = &tokens[element_start..j];
                if element.first().is_some_and(|t| word(text, t) == "action") {
                    spans.extend(uid_spans(text, element));
                }
                element_start = j + 1;
            }
            j += 1;
        }
        i = j;
    }
    spans
}

fn word<'t>(text: &'t str, token: &Token) -> &'t str {
    &text[token.span.clone()]
}

fn uid_spans(text: &str, tokens: &[Token]) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        if tokens[i].kind != TokenKind::Ident {
            i += 1;
            continue;
        }
        // Ident (:: Ident)* :: "id"
        let start = i;
        let mut j = i;
        while j + 2 < tokens.len()
            && tokens[j + 1].kind == TokenKind::PathSep
            && tokens[j + 2].kind == TokenKind::Ident
        {
            j += 2;
        }
        let is_uid = j + 2 < tokens.len()
            && tokens[j + 1].kind == TokenKind::PathSep
            && tokens[j + 2].kind == TokenKind::Str;
        if is_uid && word(text, &tokens[j]) != ACTION_TYPE {
            spans.push(tokens[start].span.start..tokens[j + 2].span.end);
        }
        i = if is_uid { j + 3 } else { j + 1 };
    }
    spans
}

fn source_index(id: &str) -> (usize, String) {
    let digits = id.trim_start_matches(|c: char| !c.is_ascii_digit());
    (digits.parse().unwrap_or(usize::MAX), id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_policy() {
        let policy_text = r#"
            permit (principal == User::"alice", action == Action::"read", resource == Document::"doc1");
            permit (principal == User::"bob", action == Action::"write", resource == Document::"doc2");
        "#;
        let policy_set = compile_policy(policy_text);
        assert!(policy_set.is_ok());
        let policy_set = policy_set.unwrap();
        assert_eq!(policy_set.num_of_policies(), 2);
    }

    #[test]
    fn test_compile_policy_error() {
        let err = compile_policy("permit (principal, action);").unwrap_err();
        assert!(matches!(err, PolicyError::ParseError(_)));
    }

    #[test]
    fn test_load_keeps_source_order_across_templates() {
        let text = r#"
            permit (principal == User::"a", action, resource);
            permit (principal == ?principal, action, resource);
            forbid (principal == User::"b", action, resource);
        "#;
        let loaded = load_cedar_policies(text).unwrap();
        assert_eq!(loaded.len(), 3);
        assert!(!loaded[0].is_template());
        assert!(loaded[1].is_template());
        assert_eq!(loaded[2].effect, crate::cedar::Effect::Forbid);
    }

    #[test]
    fn test_custom_action_types_load() {
        let text = r#"
            permit (principal, action in [PhotoOp::"view", PhotoOp::"edit"], resource);
            permit (principal, action == App::Op::"say \"hi\"", resource);
            permit (principal == ?principal, action in PhotoOp::"viewer", resource);
            permit (principal, action == Action::"read", resource)
            when { action == PhotoOp::"view" };
        "#;
        let loaded = load_cedar_policies(text).unwrap();
        assert_eq!(
            loaded[0].action,
            ActionScope::In {
                entity: None,
                entities: Some(vec![
                    CedarUid::new("PhotoOp", "view"),
                    CedarUid::new("PhotoOp", "edit"),
                ]),
            }
        );
        assert_eq!(
            loaded[1].action,
            ActionScope::Eq {
                entity: CedarUid::new("App::Op", r#"say "hi""#),
            }
        );
        assert!(loaded[2].is_template());
        assert_eq!(
            loaded[2].action,
            ActionScope::In {
                entity: Some(CedarUid::new("PhotoOp", "viewer")),
                entities: None,
            }
        );
        assert_eq!(
            loaded[3].action,
            ActionScope::Eq {
                entity: CedarUid::new("Action", "read"),
            }
        );
    }

    #[test]
    fn test_only_action_scopes_are_rewritten() {
        let text = r#"
            // permit (principal, action == Op::"in comment", resource);
            @note("permit (principal, action == Op::\"in string\", resource)")
            permit (principal == Op::"alice", action == NS::Action::"x", resource == Op::"r")
            when { context.permit == Op::"kept" };
        "#;
        assert!(custom_action_spans(text).is_empty());
        assert!(matches!(encode_custom_actions(text), Cow::Borrowed(_)));
        assert_eq!(load_cedar_policies(text).unwrap().len(), 1);
    }

    #[test]
    fn test_encoded_action_text() {
        let text = r#"forbid (principal, action == PhotoOp::"view", resource);"#;
        assert_eq!(
            encode_custom_actions(text),
            r#"forbid (principal, action == Action::"__custom_action__:PhotoOp::\"view\"", resource);"#
        );
    }

    #[test]
    fn test_source_index_orders_numerically() {
        let mut ids = vec!["policy10", "policy2", "policy0"];
        ids.sort_by_key(|id| source_index(id));
        assert_eq!(ids, vec!["policy0", "policy2", "policy10"]);
    }
}
