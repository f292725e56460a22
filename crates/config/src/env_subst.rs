/// Replace `${ENV_VAR}` placeholders in config string values.
///
/// Unresolvable variables are left as-is so the error surfaces where the
/// value is used instead of silently becoming empty.
pub fn substitute_env(input: &str) -> String {
    substitute_env_with(input, |name| std::env::var(name).ok())
}

/// Replace `${ENV_VAR}` placeholders using a custom lookup function.
///
/// Separate from [`substitute_env`] so tests never have to mutate the
/// process environment.
fn substitute_env_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                if !name.is_empty()
                    && let Some(value) = lookup(name)
                {
                    result.push_str(&value);
                } else {
                    result.push_str("${");
                    result.push_str(name);
                    result.push('}');
                }
                rest = &after[end + 1..];
            },
            None => {
                // Unclosed placeholder: emit the rest literally.
                result.push_str("${");
                result.push_str(after);
                rest = "";
            },
        }
    }

    result.push_str(rest);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_known_var() {
        let lookup = |name: &str| match name {
            "VOLERY_TEST_VAR" => Some("hello".to_string()),
            _ => None,
        };
        assert_eq!(
            substitute_env_with("key=${VOLERY_TEST_VAR}", lookup),
            "key=hello"
        );
    }

    #[test]
    fn substitutes_multiple_vars() {
        let lookup = |name: &str| match name {
            "A" => Some("1".to_string()),
            "B" => Some("2".to_string()),
            _ => None,
        };
        assert_eq!(substitute_env_with("${A}-${B}-${A}", lookup), "1-2-1");
    }

    #[test]
    fn leaves_unknown_var() {
        let lookup = |_: &str| None;
        assert_eq!(
            substitute_env_with("${VOLERY_NONEXISTENT_XYZ}", lookup),
            "${VOLERY_NONEXISTENT_XYZ}"
        );
    }

    #[test]
    fn leaves_unclosed_placeholder() {
        let lookup = |_: &str| Some("x".to_string());
        assert_eq!(substitute_env_with("tail ${OOPS", lookup), "tail ${OOPS");
    }

    #[test]
    fn empty_name_kept_literal() {
        let lookup = |_: &str| Some("x".to_string());
        assert_eq!(substitute_env_with("a${}b", lookup), "a${}b");
    }

    #[test]
    fn no_placeholders() {
        assert_eq!(substitute_env("plain text"), "plain text");
    }
}
