//! OpenAI-compatible chat-completions backend
//!
//! Two endpoints: the primary model handles direction analysis, problem
//! creation, and misconception diagnosis (accuracy matters), while the
//! helper model handles walkthroughs and feedback (tone matters, speed
//! matters more than precision). The helper falls back to the primary
//! endpoint when not configured.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};
use tutor_common::curriculum::{self, CurriculumStyle};
use tutor_common::db::models::{Student, UndiagnosedMiss};
use tutor_common::events::ProblemVariant;

use crate::config::GeneratorConfig;
use crate::error::{Error, Result};
use crate::generator::sanitize::{clean_latex, parse_json_lenient};
use crate::generator::{
    DirectionPlan, GeneratedProblem, GenerationRequest, Generator, Misconception,
};

pub struct HttpGenerator {
    client: reqwest::Client,
    config: GeneratorConfig,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

/// Which of the two configured models handles a call
#[derive(Clone, Copy)]
enum Role {
    Primary,
    Helper,
}

impl HttpGenerator {
    pub fn new(config: GeneratorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| Error::Generator(format!("http client init failed: {e}")))?;
        Ok(Self { client, config })
    }

    async fn chat(&self, role: Role, system: &str, user: &str) -> Result<String> {
        let (base_url, model) = match role {
            Role::Primary => (self.config.base_url.as_str(), self.config.model.as_str()),
            Role::Helper => (
                self.config
                    .helper_base_url
                    .as_deref()
                    .unwrap_or(&self.config.base_url),
                self.config
                    .helper_model
                    .as_deref()
                    .unwrap_or(&self.config.model),
            ),
        };
        let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));
        let body = json!({
            "model": model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "temperature": 0.7,
        });

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Generator(format!("request to {model} failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::Generator(format!(
                "{model} returned {status}: {detail:.200}"
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::Generator(format!("malformed completion from {model}: {e}")))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(Error::Generator(format!("{model} returned no content")));
        }
        debug!(model, chars = content.len(), "completion received");
        Ok(content)
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn analyze_direction(
        &self,
        student: &Student,
        history_summary: &str,
        requested_topic: Option<&str>,
    ) -> Result<DirectionPlan> {
        let scope = student.curriculum_style.grade_scope(student.grade);
        let pedagogy = student.curriculum_style.pedagogy();

        let topic_instruction = match requested_topic {
            Some(topic) => format!(
                "\n\nIMPORTANT: The student specifically requested a problem about: {topic}. \
                 Focus on this topic, but keep the difficulty appropriate for Grade {} \
                 (Curriculum: {scope}).",
                student.grade
            ),
            None => String::new(),
        };

        let system = "You are an expert elementary math tutor. You look at what the student \
                      got right and wrong, and pick the perfect next challenge - not too easy, \
                      not too hard.";
        let user = format!(
            "Student: {}, Grade {}.\n\
             Curriculum: {scope}\n\
             Teaching approach: {pedagogy}\n\n\
             Learning history (recent):\n{history_summary}\n\
             {topic_instruction}\n\n\
             Analyze and give specific instructions for the next problem. \
             State the topic, difficulty level, and what skill to target.",
            student.name, student.grade
        );

        let analysis = self.chat(Role::Primary, system, &user).await?;
        let topic = requested_topic
            .map(|t| curriculum::canonical_topic(t))
            .or_else(|| curriculum::resolve_topic(&analysis).map(str::to_string))
            .unwrap_or_else(|| "Mixed Operations".to_string());
        Ok(DirectionPlan {
            topic,
            guidance: Some(analysis),
        })
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedProblem> {
        let scope = request.style.grade_scope(request.grade);
        let pedagogy = request.style.pedagogy();
        let grade = request.grade;

        let system = "You create fun, story-based math problems using everyday situations kids \
                      love (snacks, pets, toys, sports). You always match the requested \
                      difficulty exactly. You always verify your math is correct before giving \
                      the answer.";

        let user = match request.variant {
            ProblemVariant::Standard => {
                let guidance = request.guidance.as_deref().unwrap_or("(none)");
                format!(
                    "The Learning Manager says:\n{guidance}\n\n\
                     CRITICAL CONSTRAINT: This student is in Grade {grade}. \
                     Their curriculum covers ONLY: {scope}. \
                     Teaching approach: {pedagogy}\n\
                     The problem difficulty MUST match Grade {grade} level — do NOT create \
                     problems beyond this scope.\n\n\
                     Based on these instructions, create exactly ONE math word problem about: {topic}.\n\n\
                     IMPORTANT: Your final answer must be ONLY valid JSON in this exact format:\n\
                     {{\"question\": \"the word problem text\", \"answer\": 42, \"hint\": \"a helpful hint\", \"topic\": \"Addition\"}}\n\n\
                     Rules:\n\
                     - answer must be a single number (integer or decimal)\n\
                     - VERIFY your math is correct!\n\
                     - question should be a fun story problem for a Grade {grade} student\n\
                     - hint should help without giving away the answer\n\
                     - topic should be one of: {topics}\n\
                     - Do NOT use LaTeX or math notation like \\frac{{}}{{}} or \\( \\). Write fractions as plain text like '1/3' or 'one third'\n\
                     - Output ONLY the JSON, nothing else",
                    topic = request.topic,
                    topics = curriculum::KNOWN_TOPICS.join(", "),
                )
            }
            ProblemVariant::Scaffold => {
                let detail = request
                    .misconception_detail
                    .as_deref()
                    .unwrap_or("unclear where the error happened");
                let hint = request
                    .scaffold_hint
                    .as_deref()
                    .unwrap_or("Think step by step!");
                format!(
                    "This student (Grade {grade}) just got a problem wrong.\n\n\
                     CRITICAL CONSTRAINT: This student is in Grade {grade}. \
                     Their curriculum covers ONLY: {scope}. \
                     Teaching approach: {pedagogy}\n\
                     The problem difficulty MUST match Grade {grade} level.\n\n\
                     What went wrong: {detail}\n\
                     Topic to practice: {topic}\n\n\
                     Create a SIMPLER practice problem that targets this specific weakness.\n\
                     The problem should be EASIER than the original so the student can build confidence.\n\n\
                     IMPORTANT: Your final answer must be ONLY valid JSON in this exact format:\n\
                     {{\"question\": \"the word problem text\", \"answer\": 42, \"hint\": \"a helpful hint\", \"topic\": \"{topic}\"}}\n\n\
                     Rules:\n\
                     - Make it simpler/easier than a typical grade-level problem\n\
                     - Focus specifically on the misconception area\n\
                     - answer must be a single number (integer or decimal)\n\
                     - VERIFY your math is correct!\n\
                     - hint: {hint}\n\
                     - Do NOT use LaTeX or math notation\n\
                     - Output ONLY the JSON, nothing else",
                    topic = request.topic,
                )
            }
        };

        let raw = self.chat(Role::Primary, system, &user).await?;
        let mut problem = match parse_json_lenient::<GeneratedProblem>(&raw) {
            Ok(problem) => problem,
            Err(e) => {
                // Serve the raw text rather than failing the whole run;
                // with no parsed answer the attempt grades as wrong
                warn!(%e, "problem JSON unparseable, serving raw text");
                GeneratedProblem {
                    question: raw.trim().to_string(),
                    answer: None,
                    hint: "Try your best!".to_string(),
                    topic: Some(request.topic.clone()),
                }
            }
        };
        problem.question = clean_latex(&problem.question);
        problem.hint = clean_latex(&problem.hint);
        Ok(problem)
    }

    async fn compose_walkthrough(
        &self,
        grade: i64,
        style: CurriculumStyle,
        question: &str,
        answer: Option<&str>,
        hint: &str,
    ) -> Result<String> {
        let pedagogy = style.pedagogy();
        let system = "You're amazing at making kids understand math. You use simple words, \
                      fun comparisons, and always make the student feel good about trying.";
        let answer_line = match answer {
            Some(a) => format!("Correct answer: {a}\n"),
            None => String::new(),
        };
        let user = format!(
            "A Grade {grade} student is about to work on this problem.\n\n\
             Problem: {question}\n\
             {answer_line}\
             Hint on file: {hint}\n\
             Teaching approach: {pedagogy}\n\n\
             Write a SHORT step-by-step walkthrough (3-5 steps) of how to think about \
             this problem. Do NOT state the final answer. Keep it warm, fun, and at a \
             Grade {grade} level."
        );
        let text = self.chat(Role::Helper, system, &user).await?;
        Ok(clean_latex(&text))
    }

    async fn diagnose(
        &self,
        grade: i64,
        style: CurriculumStyle,
        miss: &UndiagnosedMiss,
    ) -> Result<Misconception> {
        let system = "You are an expert in math education diagnostics. You look at a student's \
                      wrong answer and identify exactly what went wrong, so the right practice \
                      problem can be chosen.";
        let correct = miss.correct_answer.as_deref().unwrap_or("(unknown)");
        let user = format!(
            "Student: Grade {grade} ({style})\n\
             Problem: {question}\n\
             Correct answer: {correct}\n\
             Student's answer: {student_answer}\n\n\
             Analyze why the student got this wrong. Output ONLY valid JSON:\n\
             {{\"misconception_type\": \"computational|conceptual|procedural|careless\", \
             \"misconception_detail\": \"brief explanation of the specific error\", \
             \"scaffold_topic\": \"what concept to practice\", \
             \"scaffold_hint\": \"a tip for the practice problem\"}}\n\n\
             Rules:\n\
             - misconception_type must be one of: computational, conceptual, procedural, careless\n\
             - misconception_detail: 1 sentence explaining what went wrong\n\
             - scaffold_topic: the specific skill to reinforce\n\
             - scaffold_hint: a gentle hint for the upcoming practice problem\n\
             - Output ONLY the JSON, nothing else",
            style = style.display_name(),
            question = miss.question,
            student_answer = miss.student_answer.as_deref().unwrap_or("(blank)"),
        );

        let raw = self.chat(Role::Primary, system, &user).await?;
        Ok(parse_json_lenient(&raw).unwrap_or_else(|e| {
            warn!(%e, "diagnosis JSON unparseable, using generic misconception");
            Misconception {
                misconception_type: "unknown".to_string(),
                misconception_detail: Some("Could not determine the specific error".to_string()),
                scaffold_topic: Some(miss.topic.clone().unwrap_or_else(|| "General math".to_string())),
                scaffold_hint: Some("Try thinking step by step!".to_string()),
            }
        }))
    }

    async fn explain_result(
        &self,
        grade: i64,
        question: &str,
        correct_answer: Option<&str>,
        student_answer: &str,
        is_correct: bool,
    ) -> Result<String> {
        let correct = correct_answer.unwrap_or("(unknown)");
        let status = if is_correct {
            "CORRECT!".to_string()
        } else {
            format!("WRONG (correct answer was {correct})")
        };
        let system = "You're amazing at making kids understand math. You use simple words, \
                      fun comparisons, and always make the student feel good about trying.";
        let user = format!(
            "A Grade {grade} student just answered a math problem.\n\n\
             Problem: {question}\n\
             Correct answer: {correct}\n\
             Student's answer: {student_answer}\n\
             Result: {status}\n\n\
             Give a SHORT response (3-5 sentences):\n\
             - If correct: praise them and explain briefly why the answer is right\n\
             - If wrong: be gentle, show the correct steps simply, encourage them to try again\n\
             Keep it warm, fun, and at a Grade {grade} level."
        );
        let text = self.chat(Role::Helper, system, &user).await?;
        Ok(clean_latex(&text))
    }
}
