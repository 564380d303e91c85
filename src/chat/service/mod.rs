//! Entry point of the chat core: validates a request, resolves its
//! conversation, stores the user message and hands the turn to the engine.

use std::sync::Arc;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio_rusqlite::Connection;

use crate::chat::core::config::{ChatConfig, ModelSpec};
use crate::chat::core::conversation::{Conversation, Project};
use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::ids::{ConversationId, ProjectId, UserId};
use crate::chat::core::message::StoredMessage;
use crate::chat::engine::{
    EngineSettings, StreamFrame, StreamSink, TurnEngine, TurnOutcome, TurnRequest,
};
use crate::chat::ingest::{most_recent_user_message, normalize_messages, parse_raw_messages};
use crate::chat::persistence::PersistenceCommitter;
use crate::chat::resolver::{ConversationResolver, TitleGenerator};
use crate::chat::storage::{
    ConversationStore, DocumentStore, ProjectStore, SqliteConversationStore, SqliteDocumentStore,
    SqliteProjectStore,
};
use crate::chat::tools::{CreateDocumentTool, GetWeatherTool, ToolRegistry, WeatherSource};
use crate::llm::{ChatModel, ModelCatalog};

/// Body of a chat request.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    /// Conversation id; a new one is generated when absent.
    #[serde(default)]
    pub id: Option<ConversationId>,
    /// Full message history, newest last, validated by the normalizer.
    #[serde(default)]
    pub messages: Vec<Value>,
    /// Catalog id of the model variant.
    #[serde(default)]
    pub model_id: Option<String>,
}

/// A running turn.
#[derive(Debug)]
pub struct TurnHandle {
    /// Conversation the turn belongs to.
    pub conversation_id: ConversationId,
    /// Frames for the response body.
    pub frames: UnboundedReceiver<StreamFrame>,
    /// The turn task.
    pub task: JoinHandle<TurnOutcome>,
}

/// Storage backends used by the service.
#[derive(Clone)]
pub struct ChatStores {
    /// Conversations and messages.
    pub conversations: Arc<dyn ConversationStore>,
    /// Projects.
    pub projects: Arc<dyn ProjectStore>,
    /// Documents.
    pub documents: Arc<dyn DocumentStore>,
}

impl ChatStores {
    /// All stores over one `SQLite` connection.
    #[must_use]
    pub fn sqlite(conn: Connection) -> Self {
        Self {
            conversations: Arc::new(SqliteConversationStore::new(conn.clone())),
            projects: Arc::new(SqliteProjectStore::new(conn.clone())),
            documents: Arc::new(SqliteDocumentStore::new(conn)),
        }
    }
}

/// The tools every turn gets.
#[must_use]
pub fn default_tools(weather: Arc<dyn WeatherSource>) -> ToolRegistry {
    ToolRegistry::new()
        .with_tool(Arc::new(GetWeatherTool::new(weather)))
        .with_tool(Arc::new(CreateDocumentTool))
}

/// Chat orchestration service.
pub struct ChatService {
    catalog: ModelCatalog,
    stores: ChatStores,
    resolver: ConversationResolver,
    committer: PersistenceCommitter,
    engine: Arc<TurnEngine>,
}

impl ChatService {
    /// Wire the service from configuration, a model backend, storage and tools.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn new(
        config: &ChatConfig,
        model: Arc<dyn ChatModel>,
        stores: ChatStores,
        tools: ToolRegistry,
    ) -> ChatResult<Self> {
        config.validate()?;

        let titles = TitleGenerator::new(&config.llm, &config.turn)?;
        let resolver =
            ConversationResolver::new(Arc::clone(&stores.conversations), Arc::clone(&model), titles);
        let committer = PersistenceCommitter::new(Arc::clone(&stores.conversations));
        let engine = TurnEngine::new(
            model,
            tools,
            committer.clone(),
            Arc::clone(&stores.documents),
            EngineSettings {
                system_prompt: config.llm.system_prompt.clone(),
                temperature: Some(config.llm.temperature),
                max_steps: config.turn.max_steps,
                request_timeout: config.turn.request_timeout(),
            },
        );

        Ok(Self {
            catalog: ModelCatalog::from_config(&config.llm),
            stores,
            resolver,
            committer,
            engine: Arc::new(engine),
        })
    }

    /// Selectable model variants.
    #[must_use]
    pub fn models(&self) -> &[ModelSpec] {
        self.catalog.models()
    }

    /// Validate a request and start its turn.
    ///
    /// Everything that can reject the request happens here, before any frame
    /// is produced. The returned handle streams the turn's frames.
    ///
    /// # Errors
    /// `ModelNotFound`, `MalformedMessage`, `NoUserMessage`, `Unauthorized`,
    /// or a storage error when the user message cannot be saved.
    pub async fn start_turn(&self, owner_id: UserId, request: ChatRequest) -> ChatResult<TurnHandle> {
        let model = self.catalog.find(request.model_id.as_deref())?.clone();
        let history = normalize_messages(parse_raw_messages(request.messages)?)?;
        let user_message = most_recent_user_message(&history)?.clone();

        let conversation_id = request.id.unwrap_or_default();
        let conversation = self
            .resolver
            .resolve(conversation_id, owner_id, &user_message)
            .await?;

        self.committer
            .commit_user_message(conversation.id, &user_message)
            .await?;

        tracing::info!(
            conversation_id = %conversation.id,
            model = %model.id,
            messages = history.len(),
            "starting turn"
        );

        let turn = TurnRequest {
            conversation_id: conversation.id,
            owner_id,
            model_name: model.api_identifier,
            history,
        };
        let (sink, frames) = StreamSink::channel();
        let task = self.spawn_turn(turn, sink);

        Ok(TurnHandle {
            conversation_id: conversation.id,
            frames,
            task,
        })
    }

    /// The turn runs on its own task so it outlives a disconnected client.
    /// The engine enforces the request ceiling itself and commits completed
    /// steps before closing the stream.
    fn spawn_turn(&self, turn: TurnRequest, sink: StreamSink) -> JoinHandle<TurnOutcome> {
        let engine = Arc::clone(&self.engine);
        tokio::spawn(async move { engine.run(turn, sink).await })
    }

    /// The caller's conversations, newest first.
    ///
    /// # Errors
    /// Returns a storage error.
    pub async fn history(&self, owner_id: UserId) -> ChatResult<Vec<Conversation>> {
        self.stores.conversations.list_for_owner(owner_id).await
    }

    /// Stored messages of an owned conversation, in order.
    ///
    /// # Errors
    /// `NotFound`, `Unauthorized`, or a storage error.
    pub async fn messages(
        &self,
        owner_id: UserId,
        conversation_id: ConversationId,
    ) -> ChatResult<Vec<StoredMessage>> {
        self.owned_conversation(owner_id, conversation_id).await?;
        self.stores.conversations.load_messages(conversation_id).await
    }

    /// Delete an owned conversation and its messages.
    ///
    /// # Errors
    /// `NotFound`, `Unauthorized`, or a storage error.
    pub async fn delete_conversation(
        &self,
        owner_id: UserId,
        conversation_id: ConversationId,
    ) -> ChatResult<()> {
        self.owned_conversation(owner_id, conversation_id).await?;
        self.stores.conversations.delete(conversation_id).await?;
        tracing::info!(conversation_id = %conversation_id, "conversation deleted");
        Ok(())
    }

    /// Create a project.
    ///
    /// # Errors
    /// `InvalidRequest` for a blank name, or a storage error.
    pub async fn create_project(&self, owner_id: UserId, name: &str) -> ChatResult<Project> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ChatError::InvalidRequest(
                "project name must not be empty".to_string(),
            ));
        }
        let project = Project::new(owner_id, name);
        self.stores.projects.create(&project).await?;
        Ok(project)
    }

    /// The caller's projects.
    ///
    /// # Errors
    /// Returns a storage error.
    pub async fn projects(&self, owner_id: UserId) -> ChatResult<Vec<Project>> {
        self.stores.projects.list_for_owner(owner_id).await
    }

    /// Delete an owned project; its conversations become ungrouped.
    ///
    /// # Errors
    /// `NotFound`, `Unauthorized`, or a storage error.
    pub async fn delete_project(&self, owner_id: UserId, project_id: ProjectId) -> ChatResult<()> {
        self.owned_project(owner_id, project_id).await?;
        self.stores.projects.delete(project_id).await?;
        Ok(())
    }

    /// Move an owned conversation into an owned project, or out of any.
    ///
    /// # Errors
    /// `NotFound`, `Unauthorized`, or a storage error.
    pub async fn assign_project(
        &self,
        owner_id: UserId,
        conversation_id: ConversationId,
        project_id: Option<ProjectId>,
    ) -> ChatResult<()> {
        self.owned_conversation(owner_id, conversation_id).await?;
        if let Some(project_id) = project_id {
            self.owned_project(owner_id, project_id).await?;
        }
        self.stores
            .conversations
            .set_project(conversation_id, project_id)
            .await
    }

    async fn owned_conversation(
        &self,
        owner_id: UserId,
        conversation_id: ConversationId,
    ) -> ChatResult<Conversation> {
        let conversation = self
            .stores
            .conversations
            .get(conversation_id)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("conversation {conversation_id}")))?;
        if !conversation.is_owned_by(owner_id) {
            return Err(ChatError::Unauthorized);
        }
        Ok(conversation)
    }

    async fn owned_project(&self, owner_id: UserId, project_id: ProjectId) -> ChatResult<Project> {
        let project = self
            .stores
            .projects
            .get(project_id)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("project {project_id}")))?;
        if project.owner_id != owner_id {
            return Err(ChatError::Unauthorized);
        }
        Ok(project)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;
    use crate::chat::core::message::Role;
    use crate::chat::engine::TurnState;
    use crate::chat::storage::open_in_memory;
    use crate::chat::tools::ToolFuture;
    use crate::llm::scripted::ScriptedModel;

    struct MildWeather;

    impl WeatherSource for MildWeather {
        fn forecast(&self, latitude: f64, longitude: f64) -> ToolFuture<'_> {
            Box::pin(async move {
                Ok(json!({
                    "latitude": latitude,
                    "longitude": longitude,
                    "current": {"temperature_2m": 24.1}
                }))
            })
        }
    }

    async fn service_with(model: ScriptedModel, config: ChatConfig) -> (ChatService, Arc<ScriptedModel>) {
        let model = Arc::new(model);
        let stores = ChatStores::sqlite(open_in_memory().await.unwrap());
        let service = ChatService::new(
            &config,
            model.clone(),
            stores,
            default_tools(Arc::new(MildWeather)),
        )
        .unwrap();
        (service, model)
    }

    async fn service(model: ScriptedModel) -> (ChatService, Arc<ScriptedModel>) {
        service_with(model, ChatConfig::default()).await
    }

    fn request(id: ConversationId, messages: Value) -> ChatRequest {
        serde_json::from_value(json!({
            "id": id.to_string(),
            "messages": messages,
        }))
        .unwrap()
    }

    async fn finish(handle: TurnHandle) -> (TurnOutcome, Vec<StreamFrame>) {
        let TurnHandle {
            mut frames, task, ..
        } = handle;
        let outcome = task.await.unwrap();
        let mut collected = Vec::new();
        while let Ok(frame) = frames.try_recv() {
            collected.push(frame);
        }
        (outcome, collected)
    }

    #[tokio::test]
    async fn first_message_creates_a_titled_conversation() {
        let (service, _model) =
            service(ScriptedModel::new().title("Greeting").text_step("Hi there!")).await;
        let owner = UserId::new();
        let id = ConversationId::new();

        let handle = service
            .start_turn(owner, request(id, json!([{"role": "user", "content": "Hello"}])))
            .await
            .unwrap();
        assert_eq!(handle.conversation_id, id);
        finish(handle).await;

        let history = service.history(owner).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].title, "Greeting");

        let stored = service.messages(owner, id).await.unwrap();
        assert_eq!(stored[0].role, Role::User);
        assert_eq!(stored[0].content, "Hello");
        assert_eq!(stored[1].content, "Hi there!");
    }

    #[tokio::test]
    async fn weather_question_runs_the_tool_and_answers_from_it() {
        let (service, model) = service(
            ScriptedModel::new()
                .title("Weather check")
                .tool_step("call_w", "getWeather", json!({"latitude": 10, "longitude": 20}))
                .text_step("It is 24.1 degrees at 10, 20."),
        )
        .await;
        let owner = UserId::new();
        let id = ConversationId::new();

        let handle = service
            .start_turn(
                owner,
                request(id, json!([{"role": "user", "content": "what's the weather at lat=10,lon=20"}])),
            )
            .await
            .unwrap();
        let (outcome, _frames) = finish(handle).await;
        assert!(outcome.states.contains(&TurnState::ToolExecuting));
        assert_eq!(outcome.states.last(), Some(&TurnState::Closed));

        let second = &model.requests()[1];
        assert!(second.messages.iter().any(|m| m.content.contains("24.1")));

        let stored = service.messages(owner, id).await.unwrap();
        assert_eq!(stored.len(), 3);
        assert!(stored[1].content.contains("temperature_2m"));
        assert!(stored[2].content.contains("24.1"));
        assert!(stored.windows(2).all(|w| w[0].created_at < w[1].created_at));
    }

    #[tokio::test]
    async fn document_request_streams_and_saves_the_draft() {
        let (service, _model) = service(
            ScriptedModel::new()
                .title("Trip plan")
                .tool_step("call_d", "createDocument", json!({"title": "Trip Plan"}))
                .events_step(vec![
                    crate::llm::ModelEvent::TextDelta("# Trip Plan\n".to_string()),
                    crate::llm::ModelEvent::TextDelta("Day 1: Lisbon.".to_string()),
                    crate::llm::ModelEvent::Finish(crate::llm::FinishReason::Stop),
                ])
                .text_step("Your plan is ready."),
        )
        .await;
        let owner = UserId::new();

        let handle = service
            .start_turn(
                owner,
                request(ConversationId::new(), json!([{"role": "user", "content": "Make a trip plan"}])),
            )
            .await
            .unwrap();
        let (_outcome, frames) = finish(handle).await;

        let events: Vec<_> = frames
            .iter()
            .filter_map(|frame| match frame {
                StreamFrame::Data(event) => Some(event.clone()),
                _ => None,
            })
            .collect();
        let kinds: Vec<_> = events.iter().map(|event| event.kind).collect();
        use crate::chat::engine::DataEventKind::{Clear, Finish, Id, TextDelta, Title};
        assert_eq!(kinds, vec![Id, Title, Clear, TextDelta, TextDelta, Finish]);

        let document_id = events[0].content.parse().unwrap();
        let document = service
            .stores
            .documents
            .get(document_id)
            .await
            .unwrap()
            .unwrap();
        let streamed: String = events
            .iter()
            .filter(|event| event.kind == TextDelta)
            .map(|event| event.content.as_str())
            .collect();
        assert_eq!(document.content, streamed);
        assert_eq!(document.title, "Trip Plan");
    }

    #[tokio::test]
    async fn foreign_conversation_is_rejected_before_any_model_call() {
        let (service, model) = service(ScriptedModel::new().text_step("for A")).await;
        let user_a = UserId::new();
        let id = ConversationId::new();
        let handle = service
            .start_turn(user_a, request(id, json!([{"role": "user", "content": "mine"}])))
            .await
            .unwrap();
        finish(handle).await;
        let generations = model.generations().len();
        let streams = model.requests().len();

        let err = service
            .start_turn(UserId::new(), request(id, json!([{"role": "user", "content": "let me in"}])))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Unauthorized));
        assert_eq!(model.generations().len(), generations);
        assert_eq!(model.requests().len(), streams);
        assert_eq!(service.messages(user_a, id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn history_without_a_user_message_is_rejected() {
        let (service, model) = service(ScriptedModel::new()).await;
        let owner = UserId::new();
        let err = service
            .start_turn(
                owner,
                request(ConversationId::new(), json!([{"role": "assistant", "content": "hello?"}])),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NoUserMessage));
        assert!(service.history(owner).await.unwrap().is_empty());
        assert!(model.generations().is_empty());
    }

    #[tokio::test]
    async fn unknown_model_is_rejected() {
        let (service, _model) = service(ScriptedModel::new()).await;
        let mut body = request(ConversationId::new(), json!([{"role": "user", "content": "hi"}]));
        body.model_id = Some("missing".to_string());
        let err = service.start_turn(UserId::new(), body).await.unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn stalled_turn_hits_the_request_ceiling() {
        let mut config = ChatConfig::default();
        config.turn.request_timeout_secs = 1;
        let (service, _model) = service_with(
            ScriptedModel::new().stalled_step(vec![crate::llm::ModelEvent::TextDelta(
                "thinking".to_string(),
            )]),
            config,
        )
        .await;
        let owner = UserId::new();
        let id = ConversationId::new();

        let handle = service
            .start_turn(owner, request(id, json!([{"role": "user", "content": "hi"}])))
            .await
            .unwrap();
        let (outcome, frames) = finish(handle).await;
        assert!(outcome.error.as_deref().is_some_and(|e| e.contains("timed out")));
        let Some(StreamFrame::Error(message)) = frames.last() else {
            panic!("expected a terminal error frame");
        };
        assert!(message.contains("timed out"));
        assert_eq!(service.messages(owner, id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn steps_finished_before_the_ceiling_are_kept() {
        let mut config = ChatConfig::default();
        config.turn.request_timeout_secs = 1;
        let (service, _model) = service_with(
            ScriptedModel::new()
                .tool_step("call_w", "getWeather", json!({"latitude": 10, "longitude": 20}))
                .stalled_step(vec![crate::llm::ModelEvent::TextDelta("It is".to_string())]),
            config,
        )
        .await;
        let owner = UserId::new();
        let id = ConversationId::new();

        let handle = service
            .start_turn(owner, request(id, json!([{"role": "user", "content": "weather?"}])))
            .await
            .unwrap();
        let (outcome, frames) = finish(handle).await;
        assert_eq!(outcome.persisted, 1);
        assert!(matches!(frames.last(), Some(StreamFrame::Error(_))));
        assert!(!frames.iter().any(|f| matches!(f, StreamFrame::Finish { .. })));

        let stored = service.messages(owner, id).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1].role, Role::Assistant);
        assert!(stored[1].content.contains("temperature_2m"));
        assert!(!stored[1].content.contains("It is"));
    }

    #[tokio::test]
    async fn sequential_turns_alternate_roles_in_time_order() {
        let (service, _model) = service(
            ScriptedModel::new()
                .title("Chat")
                .text_step("First answer.")
                .text_step("Second answer."),
        )
        .await;
        let owner = UserId::new();
        let id = ConversationId::new();

        let handle = service
            .start_turn(owner, request(id, json!([{"role": "user", "content": "One"}])))
            .await
            .unwrap();
        finish(handle).await;

        let handle = service
            .start_turn(
                owner,
                request(
                    id,
                    json!([
                        {"role": "user", "content": "One"},
                        {"role": "assistant", "content": "First answer."},
                        {"role": "user", "content": "Two"}
                    ]),
                ),
            )
            .await
            .unwrap();
        finish(handle).await;

        let stored = service.messages(owner, id).await.unwrap();
        let roles: Vec<Role> = stored.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User, Role::Assistant]);
        let contents: Vec<&str> = stored.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["One", "First answer.", "Two", "Second answer."]);
        assert!(stored.windows(2).all(|w| w[0].created_at < w[1].created_at));
        assert_eq!(service.history(owner).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn wrongly_typed_message_is_malformed() {
        let (service, model) = service(ScriptedModel::new()).await;
        let err = service
            .start_turn(
                UserId::new(),
                request(ConversationId::new(), json!([{"role": 5, "content": "hi"}])),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::MalformedMessage { index: 0, .. }));
        assert_eq!(err.status_code(), 400);
        assert!(model.generations().is_empty());
    }

    #[tokio::test]
    async fn conversations_are_deleted_by_their_owner_only() {
        let (service, _model) = service(ScriptedModel::new().text_step("ok")).await;
        let owner = UserId::new();
        let id = ConversationId::new();
        let handle = service
            .start_turn(owner, request(id, json!([{"role": "user", "content": "hi"}])))
            .await
            .unwrap();
        finish(handle).await;

        let err = service.delete_conversation(UserId::new(), id).await.unwrap_err();
        assert!(matches!(err, ChatError::Unauthorized));

        service.delete_conversation(owner, id).await.unwrap();
        let err = service.messages(owner, id).await.unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));
    }

    #[tokio::test]
    async fn projects_group_and_release_conversations() {
        let (service, _model) = service(ScriptedModel::new().text_step("ok")).await;
        let owner = UserId::new();
        let id = ConversationId::new();
        let handle = service
            .start_turn(owner, request(id, json!([{"role": "user", "content": "hi"}])))
            .await
            .unwrap();
        finish(handle).await;

        assert!(matches!(
            service.create_project(owner, "   ").await.unwrap_err(),
            ChatError::InvalidRequest(_)
        ));
        let project = service.create_project(owner, "Travel").await.unwrap();
        service.assign_project(owner, id, Some(project.id)).await.unwrap();
        assert_eq!(service.history(owner).await.unwrap()[0].project_id, Some(project.id));

        let stranger = service.create_project(UserId::new(), "Theirs").await.unwrap();
        let err = service
            .assign_project(owner, id, Some(stranger.id))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Unauthorized));

        service.delete_project(owner, project.id).await.unwrap();
        assert_eq!(service.history(owner).await.unwrap()[0].project_id, None);
        assert!(service.projects(owner).await.unwrap().is_empty());
    }
}
