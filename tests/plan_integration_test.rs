//! 计划执行、供应商回退与重放的集成测试

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use bee_conductor::channel::{Delivery, RecordingChannel};
    use bee_conductor::config::AppConfig;
    use bee_conductor::orchestrator::{Plan, RunOptions, RunOutcome, Step};
    use bee_conductor::retry::{LastCommand, ReplayRequest};
    use bee_conductor::tools::{InMemoryTaskStore, ProviderBackend, ToolContext, ToolResult};
    use bee_conductor::{AgentBuilder, ConversationAgent, OrchestratorError};
    use serde_json::{json, Value};

    type CallLog = Arc<Mutex<Vec<(String, Value)>>>;

    /// 记录调用的供应商后端；fail 为 true 时返回字段级失败
    struct ScriptedBackend {
        fail: bool,
        calls: CallLog,
    }

    #[async_trait]
    impl ProviderBackend for ScriptedBackend {
        async fn call(&self, provider: &str, args: &Value, _ctx: &ToolContext) -> Result<ToolResult, String> {
            self.calls.lock().unwrap().push((provider.to_string(), args.clone()));
            if self.fail {
                return Ok(ToolResult::failure(format!("{provider} quota exceeded")));
            }
            let prompt = args["prompt"].as_str().unwrap_or_default();
            Ok(ToolResult::ok()
                .with_image(format!("https://cdn.test/{provider}.png"), Some(format!("{prompt} ({provider})")))
                .with_text("Image generated successfully!"))
        }
    }

    struct Harness {
        agent: ConversationAgent,
        channel: Arc<RecordingChannel>,
        calls: CallLog,
        tasks: Arc<InMemoryTaskStore>,
    }

    impl Harness {
        fn providers_called(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|(p, _)| p.clone()).collect()
        }

        fn last_prompt(&self) -> String {
            let calls = self.calls.lock().unwrap();
            calls.last().unwrap().1["prompt"].as_str().unwrap().to_string()
        }

        fn texts_containing(&self, needle: &str) -> Vec<String> {
            self.channel
                .texts()
                .into_iter()
                .filter(|t| t.contains(needle))
                .collect()
        }
    }

    fn harness(failing: &[&str], acks: bool) -> Harness {
        let mut cfg = AppConfig::default();
        cfg.store.backend = "memory".into();
        cfg.ack.enabled = acks;
        let channel = Arc::new(RecordingChannel::new());
        let calls: CallLog = Arc::new(Mutex::new(Vec::new()));
        let tasks = Arc::new(InMemoryTaskStore::new());

        let mut builder = AgentBuilder::new(cfg, channel.clone())
            .with_inference(false)
            .with_task_store(tasks.clone());
        for provider in ["gemini", "openai", "grok"] {
            let backend = Arc::new(ScriptedBackend {
                fail: failing.contains(&provider),
                calls: calls.clone(),
            });
            builder = builder
                .with_backend("image", provider, backend.clone())
                .with_backend("edit", provider, backend);
        }
        builder = builder.with_backend(
            "speech",
            "elevenlabs",
            Arc::new(ScriptedBackend {
                fail: false,
                calls: calls.clone(),
            }),
        );
        for provider in ["veo3", "sora", "kling"] {
            builder = builder.with_backend(
                "video",
                provider,
                Arc::new(ScriptedBackend {
                    fail: false,
                    calls: calls.clone(),
                }),
            );
        }
        Harness {
            agent: builder.build().unwrap(),
            channel,
            calls,
            tasks,
        }
    }

    fn three_step_plan() -> Plan {
        Plan::new(vec![
            Step::new(1, Some("echo"), "first").with_param("text", "first result"),
            Step::new(2, Some("create_poll"), "ask the group")
                .with_param("question", "Which one?")
                .with_param("options", json!(["red", "blue"])),
            Step::new(3, Some("echo"), "third").with_param("text", "third result"),
        ])
    }

    #[tokio::test]
    async fn test_all_steps_flush_in_order_and_are_recorded() {
        let h = harness(&[], false);
        let outcome = h
            .agent
            .run_plan("c1", three_step_plan(), &RunOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.attempted, 3);
        assert_eq!(outcome.succeeded, 3);

        let deliveries = h.channel.deliveries();
        assert_eq!(deliveries.len(), 3);
        assert_eq!(deliveries[0].text(), Some("first result"));
        assert!(matches!(&deliveries[1], Delivery::Poll { poll, .. } if poll.question == "Which one?"));
        assert_eq!(deliveries[2].text(), Some("third result"));

        match h.agent.last_command("c1").await.unwrap() {
            Some(LastCommand::MultiStep { plan, step_results }) => {
                assert_eq!(plan.steps.len(), 3);
                assert_eq!(step_results.len(), 3);
            }
            other => panic!("unexpected last command {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failing_step_reports_once_and_later_steps_run() {
        let h = harness(&[], false);
        let plan = Plan::new(vec![
            Step::new(1, Some("echo"), "one").with_param("text", "one"),
            Step::new(2, Some("create_poll"), "bad poll").with_param("question", "Q?"),
            Step::new(3, Some("echo"), "three").with_param("text", "three"),
        ]);
        let outcome = h.agent.run_plan("c1", plan, &RunOptions::default()).await.unwrap();
        assert_eq!(outcome.attempted, 3);
        assert_eq!(outcome.succeeded, 2);
        assert_eq!(outcome.failed(), 1);

        let errors = h.texts_containing("❌ Step");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("❌ Step 2 (create_poll) failed:"));
        assert!(errors[0].contains("Missing required argument 'options'"));
        assert_eq!(h.channel.texts().last().map(String::as_str), Some("three"));
        assert_eq!(outcome.combined_text, "one\nthree");
    }

    #[tokio::test]
    async fn test_invalid_plan_runs_nothing() {
        let h = harness(&[], true);
        let plan = Plan::new(vec![Step::new(1, Some("echo"), "a"), Step::new(3, Some("echo"), "b")]);
        let err = h.agent.run_plan("c1", plan, &RunOptions::default()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidPlan(_)));
        assert!(h.channel.deliveries().is_empty());
        assert!(h.agent.last_command("c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_later_steps_see_context_digest() {
        let h = harness(&[], false);
        let plan = Plan::new(vec![
            Step::new(1, Some("create_image"), "draw a lighthouse").with_param("prompt", "a lighthouse"),
            Step::new(2, Some("echo"), "describe the picture"),
        ]);
        let outcome = h.agent.run_plan("c1", plan, &RunOptions::default()).await.unwrap();
        let echoed = outcome.step_results[1].text.clone().unwrap();
        assert!(echoed.starts_with("CONTEXT from previous steps: Step 1 (create_image): produced image"));
        assert!(echoed.ends_with("CURRENT TASK: describe the picture"));
    }

    #[tokio::test]
    async fn test_fallback_reaches_third_provider_with_acks() {
        let h = harness(&["gemini", "openai"], true);
        let outcome = h
            .agent
            .run_tool("c1", "create_image", json!({"prompt": "a fox"}), &RunOptions::quoting("m1"))
            .await;
        assert!(outcome.result.success);
        assert_eq!(outcome.result.provider_used.as_deref(), Some("grok"));
        assert_eq!(h.providers_called(), vec!["gemini", "openai", "grok"]);

        let retries = h.texts_containing("🔄 Trying");
        assert_eq!(retries.len(), 2);
        assert!(retries[0].contains("❌ gemini: gemini quota exceeded"));
        assert!(retries[1].ends_with("🔄 Trying grok (create_image)..."));

        // 带说明的图片已经表达了成功，样板文本不再单独发送
        assert!(h.texts_containing("generated successfully").is_empty());
        assert!(matches!(
            h.channel.deliveries().last(),
            Some(Delivery::File { caption, .. }) if caption == "a fox (grok)"
        ));
    }

    #[tokio::test]
    async fn test_all_providers_failing_lists_each() {
        let h = harness(&["gemini", "openai", "grok"], false);
        let outcome = h
            .agent
            .run_tool("c1", "create_image", json!({"prompt": "a fox"}), &RunOptions::default())
            .await;
        assert!(!outcome.result.success);
        let error = outcome.result.error.unwrap();
        assert_eq!(error.matches("quota exceeded").count(), 3);
        assert_eq!(h.texts_containing("❌ Step 1 (create_image) failed").len(), 1);
    }

    #[tokio::test]
    async fn test_pinned_provider_never_falls_back() {
        let h = harness(&["openai"], false);
        let outcome = h
            .agent
            .run_tool("c1", "create_image", json!({"prompt": "a fox", "provider": "openai"}), &RunOptions::default())
            .await;
        assert!(!outcome.result.success);
        assert_eq!(h.providers_called(), vec!["openai"]);
    }

    #[tokio::test]
    async fn test_single_step_retry_with_modifications() {
        let h = harness(&[], false);
        h.agent
            .run_tool("c1", "create_image", json!({"prompt": "a fox"}), &RunOptions::default())
            .await;
        let outcome = h
            .agent
            .retry("c1", &ReplayRequest::default().with_modifications("in blue"), &RunOptions::default())
            .await
            .unwrap();
        assert!(outcome.succeeded());
        assert_eq!(h.last_prompt(), "a fox in blue");

        match h.agent.last_command("c1").await.unwrap() {
            Some(LastCommand::SingleStep { args, .. }) => assert_eq!(args["prompt"], "a fox in blue"),
            other => panic!("unexpected last command {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_speech_command_with_text_replays() {
        let h = harness(&[], false);
        let first = h
            .agent
            .run_tool("c1", "text_to_speech", json!({"text": "good morning"}), &RunOptions::default())
            .await;
        assert!(first.result.success);

        let outcome = h
            .agent
            .retry("c1", &ReplayRequest::default().with_modifications("slowly"), &RunOptions::default())
            .await
            .unwrap();
        assert!(outcome.succeeded());
        let calls = h.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].0, "elevenlabs");
        assert_eq!(calls[1].1["text"], "good morning slowly");
        assert!(calls[1].1.get("prompt").is_none());
    }

    #[tokio::test]
    async fn test_retry_selected_step_is_renumbered() {
        let h = harness(&[], false);
        h.agent
            .run_plan("c1", three_step_plan(), &RunOptions::default())
            .await
            .unwrap();
        h.channel.clear();

        let outcome = h
            .agent
            .retry("c1", &ReplayRequest::default().steps([2]), &RunOptions::default())
            .await
            .unwrap();
        let RunOutcome::Multi(plan_outcome) = outcome else {
            panic!("expected a plan replay");
        };
        assert_eq!(plan_outcome.plan.len(), 1);
        assert_eq!(plan_outcome.plan.steps[0].step_number, 1);
        assert_eq!(plan_outcome.plan.steps[0].tool.as_deref(), Some("create_poll"));
        assert_eq!(h.channel.deliveries().len(), 1);

        assert_eq!(
            h.agent
                .retry("c1", &ReplayRequest::default().steps([5]), &RunOptions::default())
                .await
                .unwrap_err(),
            OrchestratorError::NoMatchingStep
        );
    }

    #[tokio::test]
    async fn test_provider_override_only_hits_creation_steps() {
        let h = harness(&[], false);
        let plan = Plan::new(vec![
            Step::new(1, Some("create_image"), "draw").with_param("prompt", "a castle"),
            Step::new(2, Some("echo"), "note").with_param("text", "noted"),
            Step::new(3, Some("create_video"), "animate").with_param("prompt", "castle flyover"),
        ]);
        h.agent.run_plan("c1", plan, &RunOptions::default()).await.unwrap();
        h.calls.lock().unwrap().clear();

        h.agent
            .retry("c1", &ReplayRequest::default().with_provider("openai"), &RunOptions::default())
            .await
            .unwrap();
        match h.agent.last_command("c1").await.unwrap() {
            Some(LastCommand::MultiStep { plan, .. }) => {
                assert_eq!(plan.steps[0].parameters["provider"], "openai");
                assert!(plan.steps[1].parameters.get("provider").is_none());
                assert_eq!(plan.steps[2].parameters["provider"], "openai");
            }
            other => panic!("unexpected last command {other:?}"),
        }
        // 视频族没有 openai 后端，固定供应商时如实失败而不回退
        assert_eq!(h.providers_called(), vec!["openai"]);
    }

    #[tokio::test]
    async fn test_nothing_to_retry() {
        let h = harness(&[], false);
        let err = h
            .agent
            .retry("empty", &ReplayRequest::default(), &RunOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, OrchestratorError::NoLastCommand);
    }

    #[tokio::test]
    async fn test_last_command_is_last_write_wins() {
        let h = harness(&[], false);
        h.agent
            .run_tool("c1", "echo", json!({"text": "one"}), &RunOptions::default())
            .await;
        h.agent
            .run_tool("c1", "echo", json!({"text": "two"}), &RunOptions::default())
            .await;
        match h.agent.last_command("c1").await.unwrap() {
            Some(LastCommand::SingleStep { args, .. }) => assert_eq!(args["text"], "two"),
            other => panic!("unexpected last command {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_duplicate_schedule_is_deduplicated() {
        let h = harness(&[], false);
        let when = (chrono::Utc::now() + chrono::Duration::hours(2)).to_rfc3339();
        let args = json!({"message": "standup", "time": when});
        let first = h.agent.run_tool("c1", "schedule_message", args.clone(), &RunOptions::default()).await;
        let second = h.agent.run_tool("c1", "schedule_message", args, &RunOptions::default()).await;
        assert!(first.result.success);
        assert_eq!(first.result.text, second.result.text);
        assert_eq!(h.tasks.len().await, 1);
    }

    #[tokio::test]
    async fn test_step_ack_precedes_results() {
        let h = harness(&[], true);
        let opts = RunOptions::default().with_request("make me a poll about colors");
        let plan = Plan::new(vec![Step::new(1, Some("create_poll"), "ask")
            .with_param("question", "Color?")
            .with_param("options", json!(["red", "green"]))]);
        h.agent.run_plan("c1", plan, &opts).await.unwrap();
        let deliveries = h.channel.deliveries();
        assert_eq!(
            deliveries[0].text(),
            Some("📊 Creating a poll...\n> \"make me a poll about colors\"")
        );
        assert!(matches!(deliveries[1], Delivery::Poll { .. }));
    }
}
