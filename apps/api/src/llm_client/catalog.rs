use serde::Serialize;

use super::Provider;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub provider: Provider,
}

const OPENROUTER_MODELS: &[(&str, &str)] = &[
    ("anthropic/claude-3.5-sonnet", "Claude 3.5 Sonnet"),
    ("anthropic/claude-3-opus", "Claude 3 Opus"),
    ("openai/gpt-4o", "GPT-4o"),
    ("openai/gpt-4o-mini", "GPT-4o Mini"),
    ("openai/gpt-4-turbo", "GPT-4 Turbo"),
    ("meta-llama/llama-3.1-70b-instruct", "Llama 3.1 70B"),
    ("meta-llama/llama-3.1-8b-instruct", "Llama 3.1 8B"),
    ("mistralai/mixtral-8x7b-instruct", "Mixtral 8x7B"),
    ("mistralai/mistral-7b-instruct", "Mistral 7B"),
    ("google/gemma-2-9b-it", "Gemma 2 9B"),
];

const GEMINI_MODELS: &[(&str, &str)] = &[
    ("gemini-2.5-flash", "Gemini 2.5 Flash"),
    ("gemini-2.5-pro", "Gemini 2.5 Pro"),
    ("gemini-2.0-flash", "Gemini 2.0 Flash"),
];

/// Models offered to the editor, optionally for one provider only.
/// Sorted by provider, then by display name.
pub fn available_models(provider: Option<Provider>) -> Vec<ModelInfo> {
    let tables = [
        (Provider::OpenRouter, OPENROUTER_MODELS),
        (Provider::Gemini, GEMINI_MODELS),
    ];

    let mut models: Vec<ModelInfo> = tables
        .into_iter()
        .filter(|(p, _)| provider.map_or(true, |wanted| wanted == *p))
        .flat_map(|(p, table)| {
            table.iter().map(move |&(id, name)| ModelInfo {
                id,
                name,
                provider: p,
            })
        })
        .collect();
    models.sort_by(|a, b| a.provider.cmp(&b.provider).then_with(|| a.name.cmp(b.name)));
    models
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_ids_route_to_their_provider() {
        for model in available_models(None) {
            assert_eq!(Provider::for_model(model.id), model.provider, "{}", model.id);
        }
    }

    #[test]
    fn test_catalog_is_sorted_and_filterable() {
        let all = available_models(None);
        assert_eq!(all.len(), 13);
        assert_eq!(all[0].name, "Gemini 2.0 Flash");
        assert!(all
            .windows(2)
            .all(|w| (w[0].provider, w[0].name) <= (w[1].provider, w[1].name)));

        let gemini = available_models(Some(Provider::Gemini));
        assert_eq!(gemini.len(), 3);
        assert!(gemini.iter().all(|m| m.provider == Provider::Gemini));
    }
}
