use crate::date::BatchDate;
use serde::Serialize;

const JOB_NAME_PREFIX: &str =
    "ene-ats-integration-batch-prod-uber-stage5362df53-ad63-4c7a-9be1-f2b33fc83e74_";
const JOB_QUEUE: &str = "ene-ats-integration-batch-prod-uber-stage";
const JOB_DEFINITION: &str = "ene-ats-integration-batch-prod";

const SPRING_CONFIG_IMPORT: &str = "configserver:http://spring-config-server.prod.joveo.com:8888/";
const SPRING_CONFIG_SERVER_URL: &str = "spring-config-server.prod.joveo.com";
const SPRING_CONFIG_SERVER_PORT: &str = "8888";
const ENVIRONMENT: &str = "production";
const SYNCER_NAME: &str = "ADECCO_BULLHORN_APPLY_EVENT_SYNCER";
const RECEIPT_HANDLE: &str = "test";

const ID_PREFIX: &str =
    "funneltracking/bullhorn/adecco/GeneralStaffing/BH_AGS_JOB_SUBMISSION_JOVEO_OUT_";
const ID_SUFFIX: &str = ".csv$5362df53-ad63-4c7a-9be1-f2b33fc83e74,78a64614-9ca3-4b42-824c-4aac37237984,51a55bc3-c156-4c8f-9f6e-1bbe7f496d0f";

/// Body of a trigger request. Field order is the wire order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSubmission {
    #[serde(rename = "jobName")]
    pub job_name: String,
    #[serde(rename = "jobQueue")]
    pub job_queue: &'static str,
    #[serde(rename = "jobDefinition")]
    pub job_definition: &'static str,
    #[serde(rename = "envVars")]
    pub env_vars: EnvVars,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvVars {
    #[serde(rename = "spring.config.import")]
    pub spring_config_import: &'static str,
    #[serde(rename = "SPRING_CONFIG_SERVER_URL")]
    pub spring_config_server_url: &'static str,
    #[serde(rename = "ENVIRONMENT")]
    pub environment: &'static str,
    pub name: &'static str,
    #[serde(rename = "JOVEO_ENV")]
    pub joveo_env: &'static str,
    pub id: String,
    #[serde(rename = "SPRING_CONFIG_SERVER_PORT")]
    pub spring_config_server_port: &'static str,
    #[serde(rename = "receiptHandle")]
    pub receipt_handle: &'static str,
}

impl JobSubmission {
    /// Build the submission for one date. Only `jobName` and `envVars.id`
    /// depend on the date.
    pub fn for_date(date: BatchDate) -> Self {
        Self {
            job_name: job_name(date),
            job_queue: JOB_QUEUE,
            job_definition: JOB_DEFINITION,
            env_vars: EnvVars {
                spring_config_import: SPRING_CONFIG_IMPORT,
                spring_config_server_url: SPRING_CONFIG_SERVER_URL,
                environment: ENVIRONMENT,
                name: SYNCER_NAME,
                joveo_env: ENVIRONMENT,
                id: payload_id(date),
                spring_config_server_port: SPRING_CONFIG_SERVER_PORT,
                receipt_handle: RECEIPT_HANDLE,
            },
        }
    }
}

pub fn job_name(date: BatchDate) -> String {
    format!("{JOB_NAME_PREFIX}{date}")
}

pub fn payload_id(date: BatchDate) -> String {
    format!("{ID_PREFIX}{date}{ID_SUFFIX}")
}
