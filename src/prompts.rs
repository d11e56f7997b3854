pub const POLISH_SYSTEM: &str = include_str!("../data/prompts/polish_system.txt");
pub const POLISH_REFINE: &str = include_str!("../data/prompts/polish_refine.txt");
pub const POLISH_TRANSLATE: &str = include_str!("../data/prompts/polish_translate.txt");

/// Replace `{{key}}` placeholders in a template string.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut result = template.to_string();
    for (key, value) in vars {
        result = result.replace(&format!("{{{{{}}}}}", key), value);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_single_var() {
        assert_eq!(
            render("Hello {{name}}!", &[("name", "world")]),
            "Hello world!"
        );
    }

    #[test]
    fn test_render_multiple_vars() {
        assert_eq!(
            render("{{a}} and {{b}}", &[("a", "cats"), ("b", "dogs")]),
            "cats and dogs"
        );
    }

    #[test]
    fn test_render_leaves_unknown_placeholders() {
        assert_eq!(render("{{text}} {{other}}", &[("text", "x")]), "x {{other}}");
    }

    #[test]
    fn test_prompts_are_non_empty() {
        assert!(!POLISH_SYSTEM.is_empty());
        assert!(!POLISH_REFINE.is_empty());
        assert!(!POLISH_TRANSLATE.is_empty());
    }

    #[test]
    fn test_polish_templates_have_text_placeholder() {
        assert!(POLISH_REFINE.contains("{{text}}"));
        assert!(POLISH_TRANSLATE.contains("{{text}}"));
    }
}
