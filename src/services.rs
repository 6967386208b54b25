use crate::config::Config;
use crate::errors::AppError;
use crate::models::{
    CallDispatchResult, CibilReport, EmailContent, EmailDispatchResult, Lead, ServiceType,
};
use crate::workflow::normalize_in_phone;
use chrono::Utc;
use reqwest::Client;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

/// Client for the AI voice-call provider (Bland-compatible API).
///
/// Best-effort: an unset API key resolves to `success: false` without
/// touching the network, so approval workflows degrade instead of failing.
pub struct AiCallService {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl AiCallService {
    pub fn new(config: &Config, client: Client) -> Self {
        Self {
            client,
            base_url: config.call_api_base_url.clone(),
            api_key: config.call_api_key.clone(),
        }
    }

    /// Place an automated status call to a lead.
    ///
    /// # Arguments
    ///
    /// * `phone` - Destination number; normalized to +91 E.164 when possible.
    /// * `name` - Customer name used in the call script.
    /// * `service_type` / `status` - Select the call script.
    /// * `lead_id` - Attached to the call metadata for traceability.
    pub async fn place_call(
        &self,
        phone: &str,
        name: &str,
        service_type: ServiceType,
        status: &str,
        lead_id: &str,
    ) -> Result<CallDispatchResult, AppError> {
        let Some(api_key) = &self.api_key else {
            tracing::warn!("AI call API key not configured, skipping AI call");
            return Ok(CallDispatchResult {
                success: false,
                call_id: None,
                message: Some("AI calling not configured".to_string()),
            });
        };

        let phone_number = normalize_in_phone(phone).unwrap_or_else(|| {
            if phone.starts_with('+') {
                phone.to_string()
            } else {
                format!("+91{}", phone)
            }
        });
        let task = generate_call_script(service_type, status, name);

        let url = format!("{}/v1/calls", self.base_url);
        tracing::info!("Placing AI call for lead {} via {}", lead_id, url);

        let response = self
            .client
            .post(&url)
            .header("authorization", api_key)
            .json(&json!({
                "phone_number": phone_number,
                "task": task,
                "record": true,
                "max_duration": 12,
                "language": "en",
                "voicemail_action": "hangup",
                "metadata": {
                    "leadId": lead_id,
                    "serviceType": service_type.to_string(),
                    "status": status,
                    "customerName": name,
                }
            }))
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("AI call request failed: {}", e)))?;

        if !response.status().is_success() {
            let status_code = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExternalApiError(format!(
                "AI call provider returned {}: {}",
                status_code, error_text
            )));
        }

        let data: Value = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse AI call response: {}", e))
        })?;

        // Providers differ on the field name for the call reference.
        let call_id = data
            .get("call_id")
            .or_else(|| data.get("id"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        tracing::info!("✓ AI call initiated for lead {}: {:?}", lead_id, call_id);
        Ok(CallDispatchResult {
            success: true,
            call_id,
            message: Some("AI call initiated successfully".to_string()),
        })
    }
}

/// Build the call script for a service type and status. Approval statuses
/// get a tailored script; everything else gets a generic callback prompt.
pub fn generate_call_script(service_type: ServiceType, status: &str, name: &str) -> String {
    let greeting = format!("Hello {}! This is an automated call from your CRM team.", name);

    match (service_type, status) {
        (ServiceType::Loan, "Approved") => format!(
            "{} Great news! Your loan application has been approved. \
             I can help answer any questions you might have about next steps for \
             loan disbursement, interest rates and terms, documentation requirements, \
             or your payment schedule. How can I assist you today?",
            greeting
        ),
        (ServiceType::Investment, "Activated") => format!(
            "{} Excellent news! Your investment account has been successfully activated. \
             I can help you with understanding your portfolio, investment strategy details, \
             account management, or performance tracking. \
             What would you like to know about your investment account?",
            greeting
        ),
        (ServiceType::Insurance, "Policy Issued") => format!(
            "{} Wonderful news! Your insurance policy has been successfully issued and is now active. \
             I can provide information about policy details and coverage, premium payments, \
             the claim process, or renewal information. \
             How can I help you with your new insurance policy?",
            greeting
        ),
        _ => format!(
            "{} We have an important update about your {} application. \
             Please call us back at your convenience to discuss the details.",
            greeting,
            service_type.to_string().to_lowercase()
        ),
    }
}

/// Client for email dispatch plus AI content generation.
///
/// Content generation talks to an OpenRouter-compatible chat API and falls
/// back to deterministic templates on any failure; dispatch goes through a
/// Resend-compatible HTTP API. Both degrade softly when unconfigured.
pub struct EmailService {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    from: String,
    openrouter_base_url: String,
    openrouter_api_key: Option<String>,
}

impl EmailService {
    pub fn new(config: &Config, client: Client) -> Self {
        Self {
            client,
            base_url: config.email_api_base_url.clone(),
            api_key: config.email_api_key.clone(),
            from: config.email_from.clone(),
            openrouter_base_url: config.openrouter_base_url.clone(),
            openrouter_api_key: config.openrouter_api_key.clone(),
        }
    }

    /// Generate the approval email for a status change. Never fails: AI
    /// generation errors fall back to the static template.
    pub async fn generate_status_email(
        &self,
        service_type: ServiceType,
        status: &str,
        name: &str,
    ) -> EmailContent {
        let subject = status_email_subject(service_type, status);
        let system_prompt = format!(
            "You are a professional CRM assistant for a financial services company. \
             Write a short congratulatory email to a customer named {} whose {} \
             application has reached the status \"{}\". Plain text, no subject line.",
            name, service_type, status
        );

        match self.ai_chat(&system_prompt, "Write the email body now.").await {
            Ok(body) => EmailContent {
                subject,
                html: render_email_html(&body),
                text: body,
            },
            Err(e) => {
                tracing::warn!("AI email generation failed, using template: {}", e);
                let body = status_email_template(service_type, status, name);
                EmailContent {
                    subject,
                    html: render_email_html(&body),
                    text: body,
                }
            }
        }
    }

    /// Expand a CRM agent's short prompt into a full customer email.
    /// Falls back to a plain professional wrapper on generation failure.
    pub async fn generate_custom_email(&self, prompt: &str, lead: &Lead) -> EmailContent {
        let system_prompt = format!(
            "You are a professional CRM assistant. A CRM agent wants to email the customer. \
             Lead details: name {}, service type {}, sub-category {}, current status {}. \
             Expand the agent's message into a complete professional email. \
             Start your reply with a line 'Subject: ...' followed by the body.",
            lead.name, lead.service_type, lead.sub_category, lead.status
        );

        match self.ai_chat(&system_prompt, prompt).await {
            Ok(content) => {
                let mut subject = format!("Update Regarding Your {} Application", lead.service_type);
                let mut body_lines = Vec::new();
                for line in content.lines() {
                    if let Some(rest) = line.strip_prefix("Subject:") {
                        subject = rest.trim().to_string();
                    } else {
                        body_lines.push(line);
                    }
                }
                let body = body_lines.join("\n").trim().to_string();
                EmailContent {
                    subject,
                    html: render_email_html(&body),
                    text: body,
                }
            }
            Err(e) => {
                tracing::warn!("AI custom email generation failed, using fallback: {}", e);
                let body = format!(
                    "Dear {},\n\n{}\n\nPlease don't hesitate to contact us if you have any \
                     questions or need further clarification.\n\nBest regards,\nCRM Team",
                    lead.name, prompt
                );
                EmailContent {
                    subject: format!("Update Regarding Your {} Application", lead.service_type),
                    html: render_email_html(&body),
                    text: body,
                }
            }
        }
    }

    /// Send an email through the configured provider.
    pub async fn send(
        &self,
        to: &str,
        content: &EmailContent,
        lead_id: &str,
    ) -> Result<EmailDispatchResult, AppError> {
        let Some(api_key) = &self.api_key else {
            tracing::warn!("Email API key not configured, skipping email send");
            return Ok(EmailDispatchResult {
                success: false,
                email_id: None,
                message: Some("Email sending not configured".to_string()),
            });
        };

        let url = format!("{}/emails", self.base_url);
        tracing::info!("Sending email for lead {} via {}", lead_id, url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&json!({
                "from": self.from,
                "to": [to],
                "subject": content.subject,
                "html": content.html,
                "text": content.text,
            }))
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Email request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExternalApiError(format!(
                "Email provider returned {}: {}",
                status, error_text
            )));
        }

        let data: Value = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse email response: {}", e))
        })?;
        let email_id = data.get("id").and_then(|v| v.as_str()).map(|s| s.to_string());

        tracing::info!("✓ Email sent for lead {}: {:?}", lead_id, email_id);
        Ok(EmailDispatchResult {
            success: true,
            email_id,
            message: Some("Email sent successfully".to_string()),
        })
    }

    /// Single chat completion against the OpenRouter-compatible API.
    async fn ai_chat(&self, system: &str, user: &str) -> Result<String, AppError> {
        let Some(api_key) = &self.openrouter_api_key else {
            return Err(AppError::ExternalApiError(
                "AI content generation not configured".to_string(),
            ));
        };

        let url = format!("{}/v1/chat/completions", self.openrouter_base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&json!({
                "model": "anthropic/claude-3-haiku",
                "messages": [
                    { "role": "system", "content": system },
                    { "role": "user", "content": user },
                ],
                "temperature": 0.7,
                "max_tokens": 800,
            }))
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("AI request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::ExternalApiError(format!(
                "AI provider returned {}",
                response.status()
            )));
        }

        let data: Value = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse AI response: {}", e))
        })?;

        data.get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| {
                AppError::ExternalApiError("AI response missing message content".to_string())
            })
    }
}

fn status_email_subject(service_type: ServiceType, status: &str) -> String {
    match (service_type, status) {
        (ServiceType::Loan, "Approved") => "Your Loan Has Been Approved".to_string(),
        (ServiceType::Investment, "Activated") => "Your Investment Account Is Active".to_string(),
        (ServiceType::Insurance, "Policy Issued") => "Your Insurance Policy Has Been Issued".to_string(),
        _ => format!("Update Regarding Your {} Application", service_type),
    }
}

fn status_email_template(service_type: ServiceType, status: &str, name: &str) -> String {
    let highlight = match (service_type, status) {
        (ServiceType::Loan, "Approved") => {
            "Great news! Your loan application has been approved. Our team will reach out \
             shortly with the next steps for disbursement."
        }
        (ServiceType::Investment, "Activated") => {
            "Excellent news! Your investment account has been successfully activated and is \
             ready to use."
        }
        (ServiceType::Insurance, "Policy Issued") => {
            "Wonderful news! Your insurance policy has been issued and your coverage is now \
             active."
        }
        _ => "We have an important update regarding your application.",
    };

    format!(
        "Dear {},\n\n{}\n\nIf you have any questions, simply reply to this email.\n\n\
         Best regards,\nCRM Team",
        name, highlight
    )
}

fn render_email_html(body: &str) -> String {
    format!(
        "<div style=\"font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;\">{}</div>",
        body.replace("\n\n", "</p><p>").replace('\n', "<br>")
    )
}

/// Credit bureau client.
///
/// With a configured base URL this performs a real HTTP lookup; otherwise
/// it derives a deterministic mock report from the SHA-256 of the PAN, so
/// repeated checks on the same PAN agree and tests are reproducible. The
/// lookup is pure: recording the result on the lead is the caller's job.
pub struct CibilService {
    client: Client,
    base_url: Option<String>,
    api_key: Option<String>,
}

impl CibilService {
    pub fn new(config: &Config, client: Client) -> Self {
        Self {
            client,
            base_url: config.cibil_base_url.clone(),
            api_key: config.cibil_api_key.clone(),
        }
    }

    /// Fetch a credit report for the given identity fields.
    pub async fn fetch_report(
        &self,
        name: &str,
        email: &str,
        phone: &str,
        pan: &str,
        dob: Option<&str>,
        address: Option<&str>,
    ) -> Result<CibilReport, AppError> {
        let Some(base_url) = &self.base_url else {
            tracing::debug!("Credit bureau not configured, generating mock report");
            return Ok(mock_report(pan));
        };

        let url = format!("{}/v1/score", base_url);
        tracing::info!("Fetching credit report from {}", url);

        let mut request = self.client.post(&url).json(&json!({
            "name": name,
            "email": email,
            "phone": phone,
            "pan": pan,
            "dob": dob,
            "address": address,
        }));
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Credit bureau request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExternalApiError(format!(
                "Credit bureau returned {}: {}",
                status, error_text
            )));
        }

        response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse credit report: {}", e))
        })
    }
}

/// Deterministic mock credit report derived from the PAN digest.
///
/// Score is centered on 700 with a ±75 spread, clamped to the 550-850
/// bureau range; overdue accounts stay within 30% of total accounts.
pub fn mock_report(pan: &str) -> CibilReport {
    let digest = Sha256::digest(pan.as_bytes());
    let seed = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);

    let variation = (seed % 151) as i32 - 75;
    let score = (700 + variation).clamp(550, 850);
    let total_accounts = (digest[4] % 10) as i32 + 1;
    let overdue_accounts = (digest[5] as i32) % (total_accounts * 3 / 10 + 1);
    let risk_category = if score >= 750 {
        "Low Risk"
    } else if score >= 650 {
        "Medium Risk"
    } else {
        "High Risk"
    };

    CibilReport {
        score,
        risk_category: risk_category.to_string(),
        total_accounts,
        overdue_accounts,
        credit_report_date: Utc::now().date_naive(),
        generated_at: Utc::now(),
        data_source: format!("Mock Bureau ({})", hex::encode(&digest[..4])),
        confidence_score: 70 + (digest[6] % 31) as i32,
    }
}
