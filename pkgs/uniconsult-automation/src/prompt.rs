//! Application task text and generated account credentials
//!
//! The automation agent takes a single free-form task. This module renders
//! the student's profile into that text, always prefixed with the
//! non-submission guardrail, and mints the account password embedded in it.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::models::{AccountCredentials, ApplicationMode};

const PASSWORD_LENGTH: usize = 16;
const PASSWORD_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!@#$";

const SAFETY_GUARDRAIL: &str = r#"You are a university application assistant. You help fill out application forms accurately.

## CRITICAL SAFETY GUARDRAIL - MANDATORY COMPLIANCE ##

You are filling out forms on external university websites.

**YOU MUST NOT CLICK THE FINAL 'SUBMIT' BUTTON OR ANY EQUIVALENT BUTTON.**

This includes but is not limited to:
- "Submit Application"
- "Confirm Application"
- "Send Application"
- "Complete Application"
- "Finalize"
- "Submit for Review"
- Any button that would irrevocably send the application

**Instead, when you reach the final submission step:**
1. STOP immediately
2. Report the status as: "Ready for Review - Form Completion Halted per Security Protocol""#;

/// Student profile fields consumed by the prompt. Every field defaults to
/// empty: partially-filled profiles produce a partially-filled prompt, not a
/// decode failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StudentData {
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub date_of_birth: String,
    #[serde(default)]
    pub nationality: String,
    #[serde(default)]
    pub passport_number: String,
    #[serde(default)]
    pub home_address: String,
    #[serde(default)]
    pub gpa: String,
    #[serde(default)]
    pub sat_total: String,
    #[serde(default)]
    pub ielts_overall: String,
    #[serde(default)]
    pub toefl_total: String,
    #[serde(default)]
    pub preferred_major: String,
    #[serde(default)]
    pub father_name: String,
    #[serde(default)]
    pub mother_name: String,
}

/// A prompt plus the credentials minted into it. The credentials are kept so
/// the teacher can be shown the generated account after the run.
#[derive(Debug, Clone)]
pub struct ApplicationPrompt {
    pub text: String,
    pub credentials: AccountCredentials,
}

/// 16 characters drawn uniformly from letters, digits and `!@#$`.
pub fn generate_password() -> String {
    let mut rng = rand::thread_rng();
    (0..PASSWORD_LENGTH)
        .map(|_| PASSWORD_ALPHABET[rng.gen_range(0..PASSWORD_ALPHABET.len())] as char)
        .collect()
}

/// Render the full task text for one application run. The guardrail is
/// unconditional; `mode` only changes what happens after the forms are
/// filled, never whether submission is allowed.
pub fn build_application_prompt(
    student: &StudentData,
    university_name: &str,
    _mode: ApplicationMode,
) -> ApplicationPrompt {
    let password = generate_password();
    let credentials = AccountCredentials {
        email: student.email.clone(),
        password: password.clone(),
        university: university_name.to_string(),
    };

    let text = format!(
        r#"{guardrail}

## ⚠️ CRITICAL SAFETY PROTOCOL ⚠️
YOU MUST NOT CLICK THE FINAL 'SUBMIT' BUTTON OR ANY EQUIVALENT.
Stop before submission and report: "Ready for Review - Form Completion Halted per Security Protocol"

## Your Task:
Apply to {university} for the following student. Fill all forms but DO NOT submit.

## Instructions:
1. Search Google for "{university} undergraduate application portal"
2. Navigate to the official university application website
3. If there's a "Create Account" or "Register" option, create an account with:
   - Email: {email}
   - Password: {password}
   - Remember and report these credentials
4. Fill out all application forms with the student information below
5. **STOP** before the final submit button
6. Report status: "Ready for Review"

## Student Information:
- Full Name: {full_name}
- Email: {email}
- Phone: {phone}
- Date of Birth: {dob}
- Nationality: {nationality}
- Passport Number: {passport}
- Address: {address}

## Academic Information:
- GPA: {gpa}
- SAT Score: {sat}
- IELTS Score: {ielts}
- TOEFL Score: {toefl}
- Intended Major: {major}

## Family Information:
- Father's Name: {father}
- Mother's Name: {mother}

## Important Notes:
- If a field is not available, leave it blank or select "Other/Not Applicable"
- For essay questions, write: "Essay to be submitted separately"
- For document uploads, skip them and note which documents are required
- Report any account credentials you create
- **REMEMBER: DO NOT CLICK SUBMIT**

Begin now.
"#,
        guardrail = SAFETY_GUARDRAIL,
        university = university_name,
        email = student.email,
        password = password,
        full_name = student.full_name,
        phone = student.phone,
        dob = student.date_of_birth,
        nationality = student.nationality,
        passport = student.passport_number,
        address = student.home_address,
        gpa = student.gpa,
        sat = student.sat_total,
        ielts = student.ielts_overall,
        toefl = student.toefl_total,
        major = student.preferred_major,
        father = student.father_name,
        mother = student.mother_name,
    );

    ApplicationPrompt { text, credentials }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_student() -> StudentData {
        StudentData {
            full_name: "Bob Baker".to_string(),
            email: "bob@example.edu".to_string(),
            phone: "+1 555 0100".to_string(),
            gpa: "3.8".to_string(),
            preferred_major: "Computer Science".to_string(),
            ..StudentData::default()
        }
    }

    #[test]
    fn prompt_embeds_guardrail_and_student_fields() {
        let prompt = build_application_prompt(&sample_student(), "MIT", ApplicationMode::Semi);

        assert!(prompt
            .text
            .contains("YOU MUST NOT CLICK THE FINAL 'SUBMIT' BUTTON"));
        assert!(prompt.text.contains("Full Name: Bob Baker"));
        assert!(prompt.text.contains("Intended Major: Computer Science"));
        assert!(prompt.text.contains("MIT undergraduate application portal"));
        assert!(prompt.text.contains(&prompt.credentials.password));
        assert_eq!(prompt.credentials.email, "bob@example.edu");
        assert_eq!(prompt.credentials.university, "MIT");
    }

    #[test]
    fn generated_passwords_use_the_allowed_alphabet() {
        for _ in 0..50 {
            let password = generate_password();
            assert_eq!(password.chars().count(), 16);
            assert!(password
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "!@#$".contains(c)));
        }
    }

    #[test]
    fn partial_profiles_decode_with_empty_defaults() {
        let student: StudentData =
            serde_json::from_value(serde_json::json!({ "full_name": "Ada" })).unwrap();
        assert_eq!(student.full_name, "Ada");
        assert!(student.email.is_empty());
        assert!(student.toefl_total.is_empty());
    }
}
