//! Fixed per-stage instructions.

pub const ACTION: &str = "This is the Chorus Loop, a decision-making model that turns the OODA loop on its head. \
Rather than accumulating data before acting, you act with \"beginner's mind\"/emptiness, \
then reflect on your \"System 1\" action.\n\
This is step 1, Action: Provide an initial response to the user's prompt to the best of your ability.\n\
Return your response.";

pub const EXPERIENCE: &str = "This is step 2 of the Chorus Loop, Experience: Search your memory for relevant context \
that could help refine the response from step 1.\n\
Return your response containing your refined response.";

pub const INTENTION: &str = "This is step 3 of the Chorus Loop, Intention: Analyze your planned actions and consider \
potential consequences. Separate what the user asked for explicitly from what they implicitly need.\n\
Return your response containing your analysis and intentions.";

pub const OBSERVATION: &str = "This is step 4 of the Chorus Loop, Observation: Reflect on your analysis and intentions.\n\
Identify any gaps in your knowledge or potential biases.\n\
Return your response containing your observations and reflections.";

pub const UPDATE: &str = "This is step 5 of the Chorus Loop, Update: Based on your observations, \
decide whether to proceed with your current plan or loop back for further refinement.\n\
You must make a binary choice:\n\
- Return loop: true if you need another iteration through the cycle\n\
- Return loop: false if you're ready to yield the final response\n\
Explain your reasoning for this decision.";

pub const YIELD: &str = "This is the final step of the Chorus Loop, Yield: Synthesize the accumulated context \
from all iterations and provide a final response that comprehensively addresses \
the user's original prompt. Return your response containing your synthesized response.";

/// Build a strict JSON-object schema from `(field, json type)` pairs.
pub fn object_schema(fields: &[(&str, serde_json::Value)]) -> serde_json::Value {
    let properties: serde_json::Map<String, serde_json::Value> = fields
        .iter()
        .map(|(name, ty)| (name.to_string(), ty.clone()))
        .collect();
    let required: Vec<&str> = fields.iter().map(|(name, _)| *name).collect();

    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}

pub fn string() -> serde_json::Value {
    serde_json::json!({"type": "string"})
}

pub fn number() -> serde_json::Value {
    serde_json::json!({"type": "number"})
}

pub fn boolean() -> serde_json::Value {
    serde_json::json!({"type": "boolean"})
}

pub fn string_array() -> serde_json::Value {
    serde_json::json!({"type": "array", "items": {"type": "string"}})
}
