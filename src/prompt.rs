//! Prompt templates for the first message of a conversation.
//!
//! Follow-up messages are sent as typed. The R assistant template asks the
//! model to plan inside the scratchpad tag and to put code inside the R code
//! tag, which is what the default tag filter expects.

use crate::tag_filter::{R_CODE_TAG, SCRATCHPAD_TAG};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PromptTemplate {
    /// Expert R data-science assistant
    #[default]
    RAssistant,
    /// Send the question unchanged
    Plain,
}

impl PromptTemplate {
    /// Render the opening message for `question`
    pub fn render(&self, question: &str) -> String {
        match self {
            PromptTemplate::RAssistant => render_r_assistant(question.trim()),
            PromptTemplate::Plain => question.to_string(),
        }
    }

    /// Message content for a user submission; only the first turn of a
    /// conversation is wrapped in the template.
    pub fn user_message(&self, question: &str, is_first_turn: bool) -> String {
        if is_first_turn {
            self.render(question)
        } else {
            question.to_string()
        }
    }
}

fn render_r_assistant(question: &str) -> String {
    format!(
        "You are an expert data scientist with deep expertise in R programming, statistics, \
and data analysis. You will be helping users solve R programming problems, perform data \
analysis tasks, and provide statistical insights.\n\
\n\
Here is the R question or problem you need to solve:\n\
\n\
<r_question>\n\
{question}\n\
</r_question>\n\
\n\
Please approach this problem with the following guidelines:\n\
\n\
- Provide clear, well-commented R code that follows best practices\n\
- Use appropriate R packages and functions for the task\n\
- Explain your approach and reasoning before providing the code\n\
- If the problem involves data analysis, consider data exploration, cleaning, and validation steps\n\
- For statistical problems, explain the assumptions and methodology\n\
- Include error handling where appropriate\n\
- Suggest alternative approaches when relevant\n\
\n\
For complex problems that require multiple steps or careful planning, use <{scratch}> tags \
to think through your approach before providing your final response.\n\
\n\
Structure your response as follows:\n\
1. First, provide your analysis and reasoning for the approach\n\
2. Then, provide the R code solution inside <{code}> tags\n\
3. Finally, explain the output or results and any important considerations\n\
\n\
If the question is unclear or lacks necessary information (such as data structure details), \
ask for clarification rather than making assumptions.\n\
\n\
Begin your analysis of the R question now.",
        question = question,
        scratch = SCRATCHPAD_TAG,
        code = R_CODE_TAG,
    )
}
