//! Content fingerprints used as result-cache keys

use slicli_types::PluginInput;

/// Field separator that cannot occur in plugin names and is vanishingly
/// unlikely in content, so `("ab","c")` and `("a","bc")` never collide.
const SEP: char = '\u{1f}';

/// Composite cache key for one (plugin, input) pair. Options participate
/// via a canonical sorted-key serialization, so plugins that interpret
/// options never see a stale result for different options.
pub fn fingerprint(plugin: &str, input: &PluginInput) -> String {
    let mut key = String::with_capacity(plugin.len() + input.language.len() + input.content.len() + 2);
    key.push_str(plugin);
    key.push(SEP);
    key.push_str(&input.language);
    key.push(SEP);
    key.push_str(&input.content);

    if !input.options.is_empty() {
        let mut names: Vec<&String> = input.options.keys().collect();
        names.sort();
        key.push(SEP);
        for name in names {
            key.push_str(name);
            key.push('=');
            key.push_str(&input.options[name].to_string());
            key.push(';');
        }
    }
    key
}
