use super::marker::ESCALATION_MARKER;

const NO_INFORMATION: &str = "I don't have that information";

/// Prompt used when retrieval found relevant chunks: answer strictly from them.
pub fn context_prompt(query: &str, context: &str) -> String {
    format!(
        "You are a helpful university chatbot assistant. Answer the student's question based on \
         the following context from university documents. If the context doesn't contain relevant \
         information to answer the specific question, please say \"{no_info}\" and add the tag \
         {marker} to your response.\n\n\
         Context:\n{context}\n\n\
         Student's Question: {query}\n\n\
         Please provide a clear, concise, and helpful answer:",
        no_info = NO_INFORMATION,
        marker = ESCALATION_MARKER,
        context = context,
        query = query,
    )
}

/// Prompt used when retrieval came back empty: handle small talk directly,
/// escalate anything that needs university facts.
pub fn conversational_prompt(query: &str) -> String {
    format!(
        "You are a helpful university chatbot assistant. The student asked: \"{query}\"\n\n\
         If this is a general greeting (like \"hi\", \"hello\", \"how are you\") or a general \
         conversational input, answer it politely and helpfully.\n\
         If the question requires specific university information that you don't have, please \
         say \"{no_info}\" and add the tag {marker} to your response.",
        query = query,
        no_info = NO_INFORMATION,
        marker = ESCALATION_MARKER,
    )
}

pub fn build_prompt(query: &str, context: &str) -> String {
    if context.is_empty() {
        conversational_prompt(query)
    } else {
        context_prompt(query, context)
    }
}
