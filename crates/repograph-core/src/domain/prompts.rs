//! Prompt text sent to the language model collaborator

/// System prompt for document entity extraction
pub const EXTRACTION_SYSTEM_PROMPT: &str = r#"You extract a knowledge graph from technical documentation.

Identify the named entities the text talks about and the relationships between them.

Guidelines:
1. Use the exact name as written in the text (e.g., "UserRepository", not "the user repository class")
2. Only report relationships between entities you also report
3. Describe each entity in one or two sentences using information from the text only
4. Weight relationships from 1 (loosely related) to 10 (tightly coupled)

Return valid JSON only, with no additional text or explanation."#;

/// Build the extraction prompt for one document chunk
pub fn build_extraction_prompt(categories: &[String], text: &str) -> String {
    format!(
        r#"Extract entities and relationships from the text below.

ENTITY TYPES: {categories}

TEXT:
```
{text}
```

Respond in this JSON format:
```json
{{
  "entities": [
    {{"name": "EntityName", "type": "one of the entity types", "description": "What it is and does"}}
  ],
  "relationships": [
    {{"source": "EntityName", "target": "OtherEntity", "type": "uses", "description": "How they relate", "weight": 5}}
  ]
}}
```"#,
        categories = categories.join(", "),
        text = text,
    )
}

pub const CODE_SUMMARY_SYSTEM_PROMPT: &str = r#"You summarize source code declarations for a code knowledge graph.

Write a short natural-language summary of what the declaration does and its important steps.
Do not quote the code. Output only the summary, without preamble or follow-up questions."#;

pub fn build_code_summary_prompt(category: &str, name: &str, display_path: &str, code: &str) -> String {
    format!(
        "Summarize the {category} `{name}` from {display_path}.\n\n```\n{code}\n```\n\nSummary:",
    )
}

/// System prompt for answering questions from retrieved context
pub const QUERY_SYSTEM_PROMPT: &str = r#"You answer questions about a software repository using the knowledge graph context provided.

Rules:
- Base the answer on the context only. If the context does not cover the question, say so.
- Name the files and entities the answer relies on.
- Be concise and precise."#;

/// System prompt for turning a change request into an implementation plan
pub const PLAN_SYSTEM_PROMPT: &str = r#"You turn change requests into implementation plans that other engineers or agents will execute.

Structure the plan as:
- Preparation
    1. File paths of code to create or modify
    2. File paths of documents to create or modify
    3. Dependencies and impact
- Design
- Implementation
    1. Document changes
    2. Code changes

Rules:
- Always name the paths of the target documents and code files.
- Documents and code change together; when one is created or modified, update the other to keep them consistent.
- Make the smallest change that satisfies the request.
- Use the knowledge graph context to ground file paths and entity names."#;

/// Wrap retrieved context and the user's text into the final prompt
pub fn build_answer_prompt(context: &str, heading: &str, request: &str) -> String {
    format!("# Context\n\n{context}\n\n# {heading}\n\n{request}\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extraction_prompt_lists_categories() {
        let prompt = build_extraction_prompt(&["component".into(), "concept".into()], "The cache.");
        assert!(prompt.contains("component, concept"));
        assert!(prompt.contains("The cache."));
        assert!(prompt.contains("\"entities\""));
    }

    #[test]
    fn test_answer_prompt_layout() {
        let prompt = build_answer_prompt("ctx", "Question", "What is X?");
        assert!(prompt.starts_with("# Context"));
        assert!(prompt.contains("# Question\n\nWhat is X?"));
    }
}
