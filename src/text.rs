// ✂️ Tokenizer shared by the sentiment and keyword engines
//
// Lowercase, apostrophes dropped ("didn't" → "didnt", "Joe's" → "joes"),
// every other non-alphanumeric character splits tokens.

pub fn tokenize(text: &str) -> Vec<String> {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .filter(|c| *c != '\'' && *c != '’')
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    cleaned.split_whitespace().map(|t| t.to_string()).collect()
}
